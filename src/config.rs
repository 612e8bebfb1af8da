//! Where data lives
//!
//! Resolution order for the data directory: `--data-dir=` flag,
//! `ICHING_DATA_DIR`, the platform data dir (`~/.local/share/iching` on
//! Linux), then `./data`. The database defaults to `<data>/iching.db` and
//! can be moved with `--db=` or `ICHING_DB`; a `--data-dir=` flag without
//! `--db=` ignores `ICHING_DB`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const DATA_DIR_ENV: &str = "ICHING_DATA_DIR";
pub const DB_ENV: &str = "ICHING_DB";
pub const DB_FILE: &str = "iching.db";

/// Subdirectories of the data directory read by the import pipeline
pub const STRUCTURE_DIR: &str = "structure";
pub const ZHOUYI_DIR: &str = "zhouyi-64gua";
pub const CTEXT_DIR: &str = "ctext";
pub const YIZHUAN_DIR: &str = "yizhuan";
pub const COMMENTARY_DIR: &str = "commentaries";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl Paths {
    /// Resolve from explicit overrides, then the environment, then defaults
    pub fn resolve(data_dir: Option<&str>, db_path: Option<&str>) -> Self {
        Self::resolve_with(data_dir, db_path, |key| std::env::var_os(key))
    }

    /// An explicit data dir also moves the database unless `db_path` is given
    fn resolve_with(
        data_dir: Option<&str>,
        db_path: Option<&str>,
        env: impl Fn(&str) -> Option<OsString>,
    ) -> Self {
        let explicit_dir = data_dir.map(PathBuf::from);
        let data_dir = explicit_dir
            .clone()
            .or_else(|| env(DATA_DIR_ENV).map(PathBuf::from))
            .unwrap_or_else(default_data_dir);

        let db_path = match (db_path, explicit_dir) {
            (Some(db), _) => PathBuf::from(db),
            (None, Some(dir)) => dir.join(DB_FILE),
            (None, None) => env(DB_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join(DB_FILE)),
        };

        Self { data_dir, db_path }
    }

    /// Resolve from `--data-dir=` / `--db=` flags anywhere in `args`
    pub fn from_args(args: &[String]) -> Self {
        Self::resolve(flag_value(args, "--data-dir="), flag_value(args, "--db="))
    }

    pub fn with_data_dir(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            db_path: data_dir.join(DB_FILE),
        }
    }

    pub fn structure_dir(&self) -> PathBuf {
        self.data_dir.join(STRUCTURE_DIR)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("iching"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

/// Value of a `--name=value` flag
pub fn flag_value<'a>(args: &'a [String], prefix: &str) -> Option<&'a str> {
    args.iter().find_map(|a| a.strip_prefix(prefix))
}

/// Arguments that are not `--` flags
pub fn positional(args: &[String]) -> Vec<&str> {
    args.iter()
        .filter(|a| !a.starts_with("--"))
        .map(|a| a.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_explicit_flags_win() {
        let paths = Paths::from_args(&args(&["--stats", "--data-dir=/tmp/iching", "--db=/tmp/x.db"]));
        assert_eq!(paths.data_dir, PathBuf::from("/tmp/iching"));
        assert_eq!(paths.db_path, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn test_db_defaults_inside_data_dir() {
        let paths = Paths::resolve(Some("/srv/iching"), Some("/srv/iching/iching.db"));
        assert_eq!(paths, Paths::with_data_dir(Path::new("/srv/iching")));
        assert_eq!(paths.structure_dir(), PathBuf::from("/srv/iching/structure"));
    }

    #[test]
    fn test_data_dir_flag_beats_db_env() {
        let env = |key: &str| match key {
            DB_ENV => Some(OsString::from("/var/elsewhere.db")),
            DATA_DIR_ENV => Some(OsString::from("/var/iching")),
            _ => None,
        };

        let flagged = Paths::resolve_with(Some("/tmp/run"), None, env);
        assert_eq!(flagged.db_path, PathBuf::from("/tmp/run/iching.db"));

        let from_env = Paths::resolve_with(None, None, env);
        assert_eq!(from_env.data_dir, PathBuf::from("/var/iching"));
        assert_eq!(from_env.db_path, PathBuf::from("/var/elsewhere.db"));

        let both = Paths::resolve_with(Some("/tmp/run"), Some("/tmp/x.db"), env);
        assert_eq!(both.db_path, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn test_positional_skips_flags() {
        let a = args(&["--path", "1", "--json", "2"]);
        assert_eq!(positional(&a[1..]), vec!["1", "2"]);
        assert_eq!(flag_value(&a, "--missing="), None);
    }
}
