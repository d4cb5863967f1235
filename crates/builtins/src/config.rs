use std::env;
use std::path::{Path, PathBuf};

use studio_types::{StudioError, StudioResult};
use studio_util::path_from_env_or;

/// Environment variable overriding the cache directory.
pub const BUILTINS_DIR_ENV: &str = "STUDIO_BUILTINS_DIR";

pub const CHECKSUM_FILE_NAME: &str = "builtins-checksum.txt";
pub const DEFAULT_BUCKET: &str = "airplane-builtins-prod-a1a046b";
pub const DEFAULT_OBJECT_PREFIX: &str = "builtin-builds";
pub const DEFAULT_STORAGE_BASE_URL: &str = "https://storage.googleapis.com";

/// Operating systems and architectures a builtins build is published for.
pub const SUPPORTED_PLATFORMS: &[(&str, &[&str])] = &[
    ("darwin", &["amd64", "arm64"]),
    ("linux", &["amd64", "arm64"]),
    ("windows", &["amd64"]),
];

const CACHE_DIR_NAME: &str = ".airplane";

/// The current host in the `GOOS`/`GOARCH` vocabulary builds are named with.
pub fn host_platform() -> (String, String) {
    let os = match env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    let arch = match env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    };
    (os.to_string(), arch.to_string())
}

/// Where builtins come from and where they are cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinsConfig {
    pub os: String,
    pub arch: String,
    pub supported_platforms: &'static [(&'static str, &'static [&'static str])],
    pub bucket: String,
    pub object_prefix: String,
    pub storage_base_url: String,
    pub cache_dir: PathBuf,
}

impl BuiltinsConfig {
    /// Defaults for the current host, caching under `<root>/.airplane` unless
    /// [`BUILTINS_DIR_ENV`] is set.
    pub fn for_root(root: &Path) -> Self {
        let (os, arch) = host_platform();
        let cache_dir = path_from_env_or(BUILTINS_DIR_ENV, || root.join(CACHE_DIR_NAME));
        Self {
            os,
            arch,
            supported_platforms: SUPPORTED_PLATFORMS,
            bucket: DEFAULT_BUCKET.to_string(),
            object_prefix: DEFAULT_OBJECT_PREFIX.to_string(),
            storage_base_url: DEFAULT_STORAGE_BASE_URL.to_string(),
            cache_dir,
        }
    }

    pub fn with_platform(mut self, os: impl Into<String>, arch: impl Into<String>) -> Self {
        self.os = os.into();
        self.arch = arch.into();
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn is_supported(&self) -> bool {
        self.supported_platforms
            .iter()
            .any(|(os, archs)| *os == self.os && archs.contains(&self.arch.as_str()))
    }

    /// Fails with the support-contact message when no build is published for
    /// this platform.
    pub fn ensure_supported(&self) -> StudioResult<()> {
        if self.is_supported() {
            return Ok(());
        }
        Err(StudioError::unsupported(format!(
            "Local builtins execution for {} {} systems is under development. Please reach out to support for assistance.",
            self.os, self.arch
        )))
    }

    /// `builtins-<os>-<arch>`, with `.exe` on Windows.
    pub fn file_name(&self) -> String {
        let mut name = format!("builtins-{}-{}", self.os, self.arch);
        if self.os == "windows" {
            name.push_str(".exe");
        }
        name
    }

    /// Object key in the bucket.
    pub fn object_name(&self) -> String {
        format!("{}/{}", self.object_prefix.trim_end_matches('/'), self.file_name())
    }

    pub fn binary_path(&self) -> PathBuf {
        self.cache_dir.join(self.file_name())
    }

    pub fn checksum_path(&self) -> PathBuf {
        self.cache_dir.join(CHECKSUM_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use studio_types::ErrorClass;

    fn config(os: &str, arch: &str) -> BuiltinsConfig {
        BuiltinsConfig::for_root(Path::new("/work")).with_platform(os, arch)
    }

    #[test]
    fn file_names_follow_platform() {
        assert_eq!(config("linux", "arm64").file_name(), "builtins-linux-arm64");
        assert_eq!(config("windows", "amd64").file_name(), "builtins-windows-amd64.exe");
        assert_eq!(
            config("darwin", "amd64").object_name(),
            "builtin-builds/builtins-darwin-amd64"
        );
    }

    #[test]
    fn support_matrix_is_enforced() {
        assert!(config("darwin", "arm64").is_supported());
        assert!(config("windows", "amd64").is_supported());
        assert!(!config("windows", "arm64").is_supported());
        assert!(!config("freebsd", "amd64").is_supported());

        let error = config("linux", "386").ensure_supported().unwrap_err();
        assert_eq!(error.class(), ErrorClass::Unsupported);
        assert!(error.to_string().starts_with("Local builtins execution for linux 386 systems"));
    }

    #[test]
    fn cache_dir_defaults_under_root_and_honors_override() {
        temp_env::with_var_unset(BUILTINS_DIR_ENV, || {
            let config = BuiltinsConfig::for_root(Path::new("/work"));
            assert_eq!(config.cache_dir, PathBuf::from("/work/.airplane"));
            assert_eq!(config.checksum_path(), PathBuf::from("/work/.airplane/builtins-checksum.txt"));
        });
        temp_env::with_var(BUILTINS_DIR_ENV, Some("/cache/builtins"), || {
            let config = BuiltinsConfig::for_root(Path::new("/work"));
            assert_eq!(config.cache_dir, PathBuf::from("/cache/builtins"));
        });
    }
}
