//! Shell-script stand-ins for generation steps and the site generator.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub(crate) fn write_script(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// A fake `mkdocs` in `dir` that writes `index.html` and a copy of the
/// config it was given into `--site-dir`.
pub(crate) fn fake_site_generator(dir: &Path) -> PathBuf {
    let path = dir.join("fake-mkdocs");
    write_script(
        &path,
        r#"config=""; site=""
while [ $# -gt 0 ]; do
  case "$1" in
    --config-file) config="$2"; shift 2 ;;
    --site-dir) site="$2"; shift 2 ;;
    *) shift ;;
  esac
done
mkdir -p "$site"
cp "$config" "$site/config-used.yml"
echo "<html></html>" > "$site/index.html""#,
    );
    path
}
