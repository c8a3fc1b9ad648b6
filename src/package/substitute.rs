//! Placeholder and environment expansion for catalog values.
//!
//! Placeholders use single braces (`{distname}`); the double-brace form
//! (`{{distname}}`) found in older documents is accepted as well. After
//! placeholders, `$VAR` and `${VAR}` references are expanded from the host
//! environment. Unknown variables stay as written.
//!
//! [`RuntimeValues`] cover what is only known once an install starts:
//! `{lookup_path:<binary>}` is the directory a lookup path was found in and
//! `{config:<key>}` is a caller-supplied value. Both resolve to an empty
//! string when unset.

use std::collections::{BTreeMap, HashMap};

use crate::common::platform::Platform;

pub const DISTNAME: &str = "distname";
pub const DISTVERSION: &str = "distversion";
pub const CODENAME: &str = "codename";
pub const ARCHITECTURE: &str = "architecture";
pub const REPOSITORY: &str = "repository";
pub const PACKAGE_INSTALL_PATH: &str = "package_install_path";
pub const LOOKUP_PATH: &str = "lookup_path";
pub const CONFIG: &str = "config";

#[derive(Debug, Clone, Default)]
pub struct Substitutions {
    values: Vec<(&'static str, String)>,
    env: HashMap<String, String>,
}

impl Substitutions {
    /// Placeholders for `platform`, with a snapshot of the process environment.
    pub fn for_platform(platform: &Platform, repository_url: &str) -> Self {
        Self {
            values: vec![
                (DISTNAME, platform.distribution.id().to_string()),
                (DISTVERSION, platform.version.clone()),
                (CODENAME, platform.codename.clone()),
                (ARCHITECTURE, platform.arch.clone()),
                (REPOSITORY, repository_url.to_string()),
            ],
            env: std::env::vars().collect(),
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// A copy with one more placeholder bound.
    pub fn with_value(&self, key: &'static str, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.values.retain(|(k, _)| *k != key);
        next.values.push((key, value.into()));
        next
    }

    pub fn apply(&self, input: &str) -> String {
        let mut out = input.to_string();
        for (key, value) in &self.values {
            out = out.replace(&format!("{{{{{}}}}}", key), value);
            out = out.replace(&format!("{{{}}}", key), value);
        }
        shellexpand::env_with_context_no_errors(&out, |var| self.env.get(var)).into_owned()
    }

    pub fn apply_opt(&self, input: &mut Option<String>) {
        if let Some(value) = input.as_mut() {
            *value = self.apply(value);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeValues {
    lookup_dirs: BTreeMap<String, String>,
    config: BTreeMap<String, String>,
}

impl RuntimeValues {
    pub fn new(config: BTreeMap<String, String>) -> Self {
        Self {
            lookup_dirs: BTreeMap::new(),
            config,
        }
    }

    pub fn with_lookup_dir(mut self, binary: impl Into<String>, dir: impl Into<String>) -> Self {
        self.lookup_dirs.insert(binary.into(), dir.into());
        self
    }

    pub fn apply(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let tail = &rest[start..];
            match self.placeholder(tail) {
                Some((value, used)) => {
                    out.push_str(value);
                    rest = &tail[used..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// Value and byte length of the placeholder opening `tail`.
    fn placeholder(&self, tail: &str) -> Option<(&str, usize)> {
        let (open, close) = if tail.starts_with("{{") {
            ("{{", "}}")
        } else {
            ("{", "}")
        };
        let body = &tail[open.len()..];
        let end = body.find(close)?;
        let (kind, key) = body[..end].split_once(':')?;
        let table = match kind.trim() {
            LOOKUP_PATH => &self.lookup_dirs,
            CONFIG => &self.config,
            _ => return None,
        };
        let value = table.get(key.trim()).map(String::as_str).unwrap_or_default();
        Some((value, open.len() + end + close.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::platform::Distribution;

    fn vars() -> Substitutions {
        let platform = Platform::new(Distribution::Debian, "12", "bookworm", "amd64");
        let env = HashMap::from([("HOME".to_string(), "/root".to_string())]);
        Substitutions::for_platform(&platform, "https://packages.example.org/").with_env(env)
    }

    #[test]
    fn test_platform_placeholders() {
        let out = vars().apply(
            "deb http://nginx.org/packages/{distname} {codename} nginx # {architecture} {distversion}",
        );
        assert_eq!(out, "deb http://nginx.org/packages/debian bookworm nginx # amd64 12");
    }

    #[test]
    fn test_double_brace_placeholders() {
        assert_eq!(vars().apply("{{distname}}-{{codename}}"), "debian-bookworm");
    }

    #[test]
    fn test_environment_expansion_keeps_unknown() {
        let out = vars().apply("$HOME/.cache ${HOME} $PANELCTL_UNSET_VARIABLE");
        assert_eq!(out, "/root/.cache /root $PANELCTL_UNSET_VARIABLE");
    }

    #[test]
    fn test_install_path_placeholder() {
        let subs = vars().with_value(PACKAGE_INSTALL_PATH, r"C:\php");
        assert_eq!(subs.apply("{package_install_path}\\php.exe"), r"C:\php\php.exe");
    }

    #[test]
    fn test_repository_placeholder() {
        assert_eq!(
            vars().apply("{repository}chroots/php/php8.1-{architecture}.tar.gz"),
            "https://packages.example.org/chroots/php/php8.1-amd64.tar.gz"
        );
    }

    fn runtime() -> RuntimeValues {
        RuntimeValues::new(BTreeMap::from([(
            "db-password".to_string(),
            "s3cret".to_string(),
        )]))
        .with_lookup_dir("php", r"C:\php")
    }

    #[test]
    fn test_runtime_placeholders() {
        assert_eq!(
            runtime().apply("{lookup_path:php}\\php.exe -r {{config:db-password}}"),
            r"C:\php\php.exe -r s3cret"
        );
    }

    #[test]
    fn test_missing_runtime_values_are_empty() {
        assert_eq!(runtime().apply("[{config:db-user}][{lookup_path:composer}]"), "[][]");
    }

    #[test]
    fn test_runtime_leaves_other_braces() {
        let input = r#"powershell -Command "& { echo {other} }" {distname} {config:db-password"#;
        assert_eq!(runtime().apply(input), input);
    }
}
