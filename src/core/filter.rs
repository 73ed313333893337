use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::warn;

/// 包含/排除规则过滤器
///
/// 模式是 shell 风格通配符（`*`、`?`、`[...]`），区分大小写，同时匹配完整相对路径和文件名。
/// `*` 可以跨越 `/`，与 `fnmatch` 的行为一致。
#[derive(Debug, Clone)]
pub struct FilterEngine {
    exclude: GlobSet,
    include: GlobSet,
    has_include: bool,
}

impl FilterEngine {
    pub fn new(exclude_patterns: &[String], include_patterns: &[String]) -> Self {
        Self {
            exclude: Self::build_set(exclude_patterns),
            include: Self::build_set(include_patterns),
            has_include: !include_patterns.is_empty(),
        }
    }

    /// 不过滤任何路径
    pub fn allow_all() -> Self {
        Self::new(&[], &[])
    }

    fn build_set(patterns: &[String]) -> GlobSet {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            if let Some(glob) = Self::compile(pattern) {
                builder.add(glob);
            }
        }
        builder.build().unwrap_or_else(|e| {
            warn!("构建匹配规则失败，忽略全部规则: {}", e);
            GlobSet::empty()
        })
    }

    fn compile(pattern: &str) -> Option<Glob> {
        match Self::glob(pattern) {
            Ok(glob) => Some(glob),
            Err(e) => {
                warn!("无效的匹配模式 {:?}，按字面量匹配: {}", pattern, e);
                Self::glob(&globset::escape(pattern)).ok()
            }
        }
    }

    fn glob(pattern: &str) -> Result<Glob, globset::Error> {
        GlobBuilder::new(pattern)
            .literal_separator(false)
            .backslash_escape(false)
            .build()
    }

    fn base_name(path: &str) -> &str {
        path.rsplit('/').next().unwrap_or(path)
    }

    fn matches(set: &GlobSet, path: &str) -> bool {
        set.is_match(path) || set.is_match(Self::base_name(path))
    }

    /// 判断相对路径是否参与同步，排除规则优先
    pub fn include(&self, relative_path: &str) -> bool {
        if Self::matches(&self.exclude, relative_path) {
            return false;
        }

        if self.has_include {
            return Self::matches(&self.include, relative_path);
        }

        true
    }
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::allow_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_filter_includes_everything() {
        let filter = FilterEngine::allow_all();
        assert!(filter.include("a.txt"));
        assert!(filter.include("deep/nested/file.rs"));
    }

    #[test]
    fn test_exclude_matches_base_name_and_full_path() {
        let filter = FilterEngine::new(&patterns(&["*.tmp", "build/*"]), &[]);
        assert!(!filter.include("x.tmp"));
        assert!(!filter.include("dir/sub/x.tmp"));
        assert!(!filter.include("build/out.o"));
        assert!(!filter.include("build/nested/out.o"));
        assert!(filter.include("src/build.rs"));
        assert!(filter.include("a.txt"));
    }

    #[test]
    fn test_include_requires_a_match() {
        let filter = FilterEngine::new(&[], &patterns(&["*.py", "*.txt"]));
        assert!(filter.include("main.py"));
        assert!(filter.include("docs/readme.txt"));
        assert!(!filter.include("image.png"));
        assert!(!filter.include("docs"));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let filter = FilterEngine::new(&patterns(&["secret*"]), &patterns(&["*.txt"]));
        assert!(!filter.include("secret.txt"));
        assert!(!filter.include("dir/secret_notes.txt"));
        assert!(filter.include("public.txt"));
    }

    #[test]
    fn test_character_classes_and_case_sensitivity() {
        let filter = FilterEngine::new(&patterns(&["file[0-9].log", "?.bak"]), &[]);
        assert!(!filter.include("file3.log"));
        assert!(filter.include("fileX.log"));
        assert!(!filter.include("a.bak"));
        assert!(filter.include("ab.bak"));

        let filter = FilterEngine::new(&patterns(&["*.TMP"]), &[]);
        assert!(filter.include("x.tmp"));
        assert!(!filter.include("x.TMP"));
    }

    #[test]
    fn test_invalid_pattern_matches_literally() {
        let filter = FilterEngine::new(&patterns(&["broken[.txt"]), &[]);
        assert!(!filter.include("broken[.txt"));
        assert!(filter.include("brokena.txt"));
    }
}
