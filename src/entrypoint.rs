//! Launch script generation.
//!
//! Every composed image carries an `/entrypoint.sh` that mounts the
//! configured buckets, runs the package build, uploads the result and
//! reports its checksum through the termination message file.
//!
//! ## Script Contract
//!
//! | Input                  | Meaning                         |
//! |------------------------|---------------------------------|
//! | `$1`                   | recipe path                     |
//! | `$2`                   | source directory (created)      |
//! | `$PACKAGES_UPLOAD_URL` | HTTP PUT target for the tarball |
//!
//! The last line written to `/dev/termination-log` is the bare sha256 of
//! `packages.tar.gz`.
//!
//! Mount fields and flags are inserted verbatim, without shell quoting, so
//! flags may use shell expansion. They must come from trusted configuration.

use crate::constants::{
    ENTRYPOINT_FILE, ENTRYPOINT_MODE, PACKAGES_UPLOAD_URL_ENV, TERMINATION_MESSAGE_PATH,
};
use crate::error::{Error, Result};
use crate::layer::Layer;
use crate::mount::GcsFuseMount;
use minijinja::Environment;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

const TEMPLATE_NAME: &str = "entrypoint.sh";

const TEMPLATE: &str = r#"# generated by magikbundle
set -eux

{% for mount in mounts %}
mkdir -p {{ mount.mount }}
gcsfuse -o ro --implicit-dirs {% if mount.only_dir %}--only-dir {{ mount.only_dir }} {% endif %}{{ mount.bucket }} {{ mount.mount }}
{% endfor %}

melange keygen local-melange.rsa

mkdir -p "$2"

melange build "$1" \
  --gcplog \
  --source-dir "$2"{% for flag in flags %} \
  {{ flag }}{% endfor %}


tar -C packages -czvf packages.tar.gz .

curl --upload-file packages.tar.gz -H "Content-Type: application/octet-stream" "${{ upload_url_env }}"

sha256sum packages.tar.gz
sha256sum packages.tar.gz | cut -d' ' -f1 > {{ termination_log }}
"#;

/// Shared, read-only template environment, built on first use.
static TEMPLATES: LazyLock<std::result::Result<Environment<'static>, String>> =
    LazyLock::new(|| {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_keep_trailing_newline(true);
        env.add_template(TEMPLATE_NAME, TEMPLATE)
            .map_err(|e| e.to_string())?;
        Ok(env)
    });

#[derive(Serialize)]
struct ScriptContext<'a> {
    mounts: &'a [GcsFuseMount],
    flags: &'a [String],
    upload_url_env: &'static str,
    termination_log: &'static str,
}

/// Per-architecture launch configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entrypoint {
    /// Extra flags for the build tool, in order.
    pub flags: Vec<String>,
    /// Buckets to mount before building, in order.
    pub mounts: Vec<GcsFuseMount>,
}

impl Entrypoint {
    /// Creates an entrypoint with no flags and no mounts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an entrypoint from flags and `bucket[/onlydir]:/mount` specs.
    pub fn from_specs<S: AsRef<str>>(flags: Vec<String>, mounts: &[S]) -> Result<Self> {
        let mounts = mounts
            .iter()
            .map(|m| GcsFuseMount::parse(m.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { flags, mounts })
    }

    /// Appends a build flag.
    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    /// Appends a mount.
    pub fn mount(mut self, mount: GcsFuseMount) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Renders the launch script.
    pub fn render(&self) -> Result<String> {
        let env = TEMPLATES.as_ref().map_err(|e| Error::Template(e.clone()))?;
        let template = env
            .get_template(TEMPLATE_NAME)
            .map_err(|e| Error::Template(e.to_string()))?;

        template
            .render(ScriptContext {
                mounts: &self.mounts,
                flags: &self.flags,
                upload_url_env: PACKAGES_UPLOAD_URL_ENV,
                termination_log: TERMINATION_MESSAGE_PATH,
            })
            .map_err(|e| Error::Template(e.to_string()))
    }

    /// Renders the launch script into a single-file layer (`entrypoint.sh`, 0755).
    pub fn layer(&self) -> Result<Layer> {
        let script = self.render()?;
        Layer::from_file(ENTRYPOINT_FILE, script.as_bytes(), ENTRYPOINT_MODE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_parses() {
        assert!(TEMPLATES.is_ok(), "{:?}", TEMPLATES.as_ref().err());
    }

    #[test]
    fn test_flags_are_continuation_lines() {
        let script = Entrypoint::new()
            .flag("--arch x86_64")
            .flag("--debug")
            .render()
            .unwrap();

        assert!(script.contains(
            "  --source-dir \"$2\" \\\n  --arch x86_64 \\\n  --debug\n\ntar -C packages"
        ));
    }

    #[test]
    fn test_no_flags_ends_build_command() {
        let script = Entrypoint::new().render().unwrap();
        assert!(script.contains("  --source-dir \"$2\"\n\ntar -C packages"));
        assert!(!script.contains("gcsfuse"));
    }

    #[test]
    fn test_mount_lines() {
        let script = Entrypoint::new()
            .mount(GcsFuseMount::parse("bucket/dir:/mnt/a").unwrap())
            .mount(GcsFuseMount::parse("other:/mnt/b").unwrap())
            .render()
            .unwrap();

        assert!(script.contains(
            "mkdir -p /mnt/a\ngcsfuse -o ro --implicit-dirs --only-dir dir bucket /mnt/a\n"
        ));
        assert!(script.contains("mkdir -p /mnt/b\ngcsfuse -o ro --implicit-dirs other /mnt/b\n"));
    }

    #[test]
    fn test_trailing_newline_kept() {
        let script = Entrypoint::new().render().unwrap();
        assert!(script.ends_with("> /dev/termination-log\n"));
    }
}
