//! Core Properties implementation

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use crate::error::{PropertiesError, Result};
use crate::{CONFIG_ENV_VAR, CONFIG_PROPERTY, RUNTIME_PREFIX};

/// A stored value plus whether anyone has read it yet
#[derive(Debug)]
struct PropertyValue {
    value: String,
    used: AtomicBool,
}

impl PropertyValue {
    fn new(value: String) -> Self {
        Self {
            value,
            used: AtomicBool::new(false),
        }
    }

    fn read(&self) -> &str {
        self.used.store(true, Ordering::Relaxed);
        &self.value
    }
}

impl Clone for PropertyValue {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            used: AtomicBool::new(self.used.load(Ordering::Relaxed)),
        }
    }
}

/// Thread-safe string key/value configuration store
///
/// Reads mark a property as used so that configuration typos can be reported
/// through [`Properties::unused_properties`] when the runtime shuts down.
#[derive(Debug, Default)]
pub struct Properties {
    values: RwLock<BTreeMap<String, PropertyValue>>,
}

impl Properties {
    /// Create an empty property set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a property set from defaults, configuration files and command-line options
    ///
    /// Runtime options (`--Comm.*`) are removed from `args`; everything else is
    /// left in place for the application.
    pub fn from_args(args: &mut Vec<String>, defaults: Option<&Properties>) -> Result<Self> {
        debug!(arg_count = args.len(), has_defaults = defaults.is_some(), "Properties::from_args: called");
        let props = match defaults {
            Some(defaults) => defaults.clone_properties(),
            None => Self::new(),
        };

        // Command-line options win over file contents, so collect them apart and apply last
        let overrides = Self::new();
        *args = overrides.parse_runtime_command_line_options(args)?;

        let mut config_files = overrides.get_property(CONFIG_PROPERTY);
        if config_files.is_empty() {
            config_files = props.get_property(CONFIG_PROPERTY);
        }
        if config_files.is_empty() {
            config_files = std::env::var(CONFIG_ENV_VAR).unwrap_or_default();
        }
        if !config_files.is_empty() {
            debug!(%config_files, "Properties::from_args: loading configuration files");
            props.set_property(CONFIG_PROPERTY, &config_files)?;
            props.load_config()?;
        }

        for (key, value) in overrides.get_properties_for_prefix("") {
            props.set_property(&key, &value)?;
        }

        debug!(count = props.len(), remaining_args = args.len(), "Properties::from_args: done");
        Ok(props)
    }

    fn read_values(&self) -> RwLockReadGuard<'_, BTreeMap<String, PropertyValue>> {
        self.values.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_values(&self) -> RwLockWriteGuard<'_, BTreeMap<String, PropertyValue>> {
        self.values.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a property, or an empty string when it is not set
    pub fn get_property(&self, key: &str) -> String {
        self.get_property_with_default(key, "")
    }

    /// Get a property, or `default` when it is not set
    pub fn get_property_with_default(&self, key: &str, default: &str) -> String {
        self.read_values()
            .get(key)
            .map(|value| value.read().to_string())
            .unwrap_or_else(|| default.to_string())
    }

    /// Get a property as an integer, or 0 when it is not set
    pub fn get_property_as_int(&self, key: &str) -> i32 {
        self.get_property_as_int_with_default(key, 0)
    }

    /// Get a property as an integer, or `default` when it is unset or not a number
    pub fn get_property_as_int_with_default(&self, key: &str, default: i32) -> i32 {
        let values = self.read_values();
        let Some(value) = values.get(key) else {
            return default;
        };

        let raw = value.read();
        match raw.trim().parse::<i32>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(%key, value = %raw, default, "Property is not an integer, using default");
                default
            }
        }
    }

    /// Get every property whose key starts with `prefix`
    pub fn get_properties_for_prefix(&self, prefix: &str) -> BTreeMap<String, String> {
        self.read_values()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.read().to_string()))
            .collect()
    }

    /// Set a property; an empty value removes it
    pub fn set_property(&self, key: &str, value: &str) -> Result<()> {
        let key = key.trim();
        if key.is_empty() {
            return Err(PropertiesError::EmptyKey);
        }

        let mut values = self.write_values();
        if value.is_empty() {
            debug!(%key, "Properties::set_property: removing");
            values.remove(key);
            return Ok(());
        }

        debug!(%key, %value, "Properties::set_property: called");
        match values.get_mut(key) {
            Some(existing) => existing.value = value.to_string(),
            None => {
                values.insert(key.to_string(), PropertyValue::new(value.to_string()));
            }
        }
        Ok(())
    }

    /// Render every property as a `--key=value` option
    pub fn get_command_line_options(&self) -> Vec<String> {
        self.read_values()
            .iter()
            .map(|(key, value)| format!("--{}={}", key, value.value))
            .collect()
    }

    /// Consume `--<prefix>.Key[=value]` options, returning the ones left over
    ///
    /// An option without `=` sets the property to `"1"`.
    pub fn parse_command_line_options(&self, prefix: &str, options: &[String]) -> Result<Vec<String>> {
        debug!(%prefix, option_count = options.len(), "Properties::parse_command_line_options: called");
        let mut pattern = format!("--{}", prefix);
        if !prefix.is_empty() && !prefix.ends_with('.') {
            pattern.push('.');
        }

        let mut remaining = Vec::with_capacity(options.len());
        for option in options {
            if !option.starts_with(&pattern) {
                remaining.push(option.clone());
                continue;
            }

            let body = &option[2..];
            let (key, value) = body.split_once('=').unwrap_or((body, "1"));
            self.set_property(key, value)?;
        }

        Ok(remaining)
    }

    /// Consume the runtime's own `--Comm.*` options
    pub fn parse_runtime_command_line_options(&self, options: &[String]) -> Result<Vec<String>> {
        self.parse_command_line_options(RUNTIME_PREFIX, options)
    }

    /// Load a property file, overriding existing keys
    pub fn load(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| PropertiesError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut count = 0usize;
        for line in content.lines() {
            if let Some((key, value)) = parse_line(line) {
                self.set_property(&key, &value)?;
                count += 1;
            }
        }

        info!(path = %path.display(), count, "Loaded property file");
        Ok(())
    }

    /// Load every file listed (comma separated) in `Comm.Config`
    pub fn load_config(&self) -> Result<()> {
        let files = self.get_property(CONFIG_PROPERTY);
        for file in files.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            self.load(file)?;
        }
        Ok(())
    }

    /// Keys that were set but never read
    pub fn unused_properties(&self) -> Vec<String> {
        self.read_values()
            .iter()
            .filter(|(_, value)| !value.used.load(Ordering::Relaxed))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Deep copy; later changes to either set are not seen by the other
    pub fn clone_properties(&self) -> Properties {
        Properties {
            values: RwLock::new(self.read_values().clone()),
        }
    }

    /// Number of properties set
    pub fn len(&self) -> usize {
        self.read_values().len()
    }

    /// Whether no property is set
    pub fn is_empty(&self) -> bool {
        self.read_values().is_empty()
    }
}

/// Parse one line of a property file into a key/value pair
///
/// `#` starts a comment; `\#`, `\=` and `\\` escape the literal character.
/// Blank lines, comments and lines without `=` yield `None`.
pub fn parse_line(line: &str) -> Option<(String, String)> {
    let mut key = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        let target = if in_value { &mut value } else { &mut key };
        match c {
            '\\' => match chars.peek() {
                Some(&escaped @ ('#' | '=' | '\\')) => {
                    chars.next();
                    target.push(escaped);
                }
                _ => target.push('\\'),
            },
            '#' => break,
            '=' if !in_value => in_value = true,
            _ => target.push(c),
        }
    }

    let key = key.trim();
    if key.is_empty() || !in_value {
        return None;
    }
    Some((key.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_set_get_and_remove() {
        let props = Properties::new();
        props.set_property("Printer.Endpoints", "tcp -p 10000").unwrap();
        assert_eq!(props.get_property("Printer.Endpoints"), "tcp -p 10000");

        props.set_property("Printer.Endpoints", "").unwrap();
        assert_eq!(props.get_property("Printer.Endpoints"), "");
        assert!(props.is_empty());
    }

    #[test]
    fn test_empty_key_rejected() {
        let props = Properties::new();
        assert!(matches!(props.set_property("   ", "x"), Err(PropertiesError::EmptyKey)));
    }

    #[test]
    fn test_int_accessors() {
        let props = Properties::new();
        props.set_property("A.Timeout", " 30 ").unwrap();
        props.set_property("A.Bad", "thirty").unwrap();

        assert_eq!(props.get_property_as_int("A.Timeout"), 30);
        assert_eq!(props.get_property_as_int("A.Missing"), 0);
        assert_eq!(props.get_property_as_int_with_default("A.Missing", -1), -1);
        assert_eq!(props.get_property_as_int_with_default("A.Bad", 7), 7);
    }

    #[test]
    fn test_prefix_query() {
        let props = Properties::new();
        props.set_property("A.Endpoints", "tcp").unwrap();
        props.set_property("A.Router", "r").unwrap();
        props.set_property("AB.Endpoints", "udp").unwrap();

        let for_a = props.get_properties_for_prefix("A.");
        assert_eq!(for_a.len(), 2);
        assert_eq!(for_a.get("A.Router").map(String::as_str), Some("r"));
    }

    #[test]
    fn test_parse_command_line_options() {
        let props = Properties::new();
        let remaining = props
            .parse_command_line_options("Comm", &args(&["--Comm.Trace=2", "--Comm.Flag", "--Other.X=1", "file.txt"]))
            .unwrap();

        assert_eq!(remaining, args(&["--Other.X=1", "file.txt"]));
        assert_eq!(props.get_property("Comm.Trace"), "2");
        assert_eq!(props.get_property("Comm.Flag"), "1");
        assert_eq!(props.get_property("Other.X"), "");
    }

    #[test]
    fn test_prefix_must_match_whole_segment() {
        let props = Properties::new();
        let remaining = props
            .parse_command_line_options("Comm", &args(&["--Community.X=1"]))
            .unwrap();

        assert_eq!(remaining.len(), 1);
        assert!(props.is_empty());
    }

    #[test]
    fn test_command_line_options_render() {
        let props = Properties::new();
        props.set_property("B.Key", "v").unwrap();
        props.set_property("A.Key", "w").unwrap();

        assert_eq!(props.get_command_line_options(), args(&["--A.Key=w", "--B.Key=v"]));
    }

    #[test]
    fn test_parse_line_handles_comments_and_escapes() {
        assert_eq!(parse_line("# just a comment"), None);
        assert_eq!(parse_line("   "), None);
        assert_eq!(parse_line("no equals sign"), None);
        assert_eq!(
            parse_line("  Key.Name =  some value # trailing"),
            Some(("Key.Name".to_string(), "some value".to_string()))
        );
        assert_eq!(
            parse_line(r"Weird\=Key = a \# b \\ c"),
            Some(("Weird=Key".to_string(), r"a # b \ c".to_string()))
        );
    }

    #[test]
    fn test_load_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app.cfg");
        fs::write(&path, "# config\nA.Endpoints = tcp -p 4061\nA.AdapterId=printer\n").unwrap();

        let props = Properties::new();
        props.load(&path).unwrap();

        assert_eq!(props.get_property("A.Endpoints"), "tcp -p 4061");
        assert_eq!(props.get_property("A.AdapterId"), "printer");
    }

    #[test]
    fn test_load_missing_file_reports_path() {
        let props = Properties::new();
        let err = props.load("/definitely/not/here.cfg").unwrap_err();
        assert!(matches!(err, PropertiesError::Io { .. }));
    }

    #[test]
    fn test_from_args_command_line_overrides_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("app.cfg");
        fs::write(&path, "Comm.Trace = 1\nA.Endpoints = tcp\n").unwrap();

        let mut argv = args(&[
            &format!("--Comm.Config={}", path.display()),
            "--Comm.Trace=3",
            "positional",
        ]);
        let props = Properties::from_args(&mut argv, None).unwrap();

        assert_eq!(argv, args(&["positional"]));
        assert_eq!(props.get_property("Comm.Trace"), "3");
        assert_eq!(props.get_property("A.Endpoints"), "tcp");
    }

    #[test]
    fn test_from_args_copies_defaults() {
        let defaults = Properties::new();
        defaults.set_property("Comm.ProgramName", "demo").unwrap();

        let mut argv = Vec::new();
        let props = Properties::from_args(&mut argv, Some(&defaults)).unwrap();
        props.set_property("Comm.ProgramName", "changed").unwrap();

        assert_eq!(defaults.get_property("Comm.ProgramName"), "demo");
        assert_eq!(props.get_property("Comm.ProgramName"), "changed");
    }

    #[test]
    fn test_unused_properties() {
        let props = Properties::new();
        props.set_property("Used.Key", "1").unwrap();
        props.set_property("Typo.Key", "1").unwrap();

        let _ = props.get_property("Used.Key");
        assert_eq!(props.unused_properties(), vec!["Typo.Key".to_string()]);

        // Overwriting keeps the used flag
        props.set_property("Used.Key", "2").unwrap();
        assert_eq!(props.unused_properties(), vec!["Typo.Key".to_string()]);
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let props = Arc::new(Properties::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let props = Arc::clone(&props);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        props.set_property(&format!("T{}.K{}", i, j), "v").unwrap();
                        let _ = props.get_properties_for_prefix(&format!("T{}.", i));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(props.len(), 400);
    }
}
