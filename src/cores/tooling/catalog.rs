use serde::Serialize;
use std::env;
use std::path::{Path, PathBuf};

use super::templates::ToolTemplates;

#[derive(Debug, Clone, Serialize)]
pub struct ToolBinary {
    pub label: String,
    pub program: String,
    pub available: bool,
    pub path: Option<PathBuf>,
}

/// Which configured programs can actually be spawned on this host.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCatalog {
    pub tools: Vec<ToolBinary>,
}

impl ToolCatalog {
    pub fn detect(templates: &ToolTemplates) -> Self {
        let tools = templates
            .iter()
            .map(|(label, spec)| probe_binary(label, &spec.program))
            .collect();
        Self { tools }
    }

    pub fn missing(&self) -> impl Iterator<Item = &ToolBinary> {
        self.tools.iter().filter(|t| !t.available)
    }

    pub fn all_available(&self) -> bool {
        self.tools.iter().all(|t| t.available)
    }

    /// One line per tool, for the `tools` subcommand.
    pub fn render_lines(&self) -> Vec<String> {
        self.tools
            .iter()
            .map(|t| match &t.path {
                Some(p) => format!("{:<15} {:<14} {}", t.label, t.program, p.display()),
                None => format!("{:<15} {:<14} MISSING", t.label, t.program),
            })
            .collect()
    }
}

/// Resolve `program` the way the invoker will spawn it: a value with a path
/// separator names a file, anything else is searched on `PATH`.
fn probe_binary(label: &str, program: &str) -> ToolBinary {
    let path = if program.contains(std::path::MAIN_SEPARATOR) {
        Some(PathBuf::from(program)).filter(|p| runnable(p))
    } else {
        env::var_os("PATH").and_then(|dirs| {
            env::split_paths(&dirs)
                .flat_map(|dir| {
                    let plain = dir.join(program);
                    let exe = cfg!(windows).then(|| dir.join(format!("{program}.exe")));
                    std::iter::once(plain).chain(exe)
                })
                .find(|p| runnable(p))
        })
    };
    ToolBinary {
        label: label.to_string(),
        program: program.to_string(),
        available: path.is_some(),
        path,
    }
}

/// Regular file with at least one execute bit (any regular file off unix).
fn runnable(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(md) if md.is_file() => {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                md.permissions().mode() & 0o111 != 0
            }
            #[cfg(not(unix))]
            {
                true
            }
        }
        _ => false,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::cores::tooling::ToolSpec;

    #[test]
    fn detects_present_and_missing_programs() {
        let templates = ToolTemplates {
            probe: ToolSpec::new("sh", &[]),
            fingerprint: ToolSpec::new("ultrascan-missing-fingerprinter", &[]),
            ..ToolTemplates::default()
        };
        let catalog = ToolCatalog::detect(&templates);
        assert_eq!(catalog.tools.len(), 6);
        let probe = &catalog.tools[0];
        assert_eq!(probe.label, "probe");
        assert!(probe.available);
        assert!(probe.path.as_ref().unwrap().ends_with("sh"));

        let missing: Vec<_> = catalog.missing().map(|t| t.label.as_str()).collect();
        assert!(missing.contains(&"fingerprint"));
        assert!(!catalog.all_available());
        assert!(catalog.render_lines()[1].ends_with("MISSING"));
    }

    #[test]
    fn absolute_program_paths_are_checked_directly() {
        let bin = probe_binary("probe", "/bin/sh");
        assert!(bin.available);
        let bin = probe_binary("probe", "/nonexistent/dir/ping");
        assert!(!bin.available);
    }

    #[test]
    fn non_executable_files_are_not_runnable() {
        use std::os::unix::fs::PermissionsExt;
        let file = std::env::temp_dir().join(format!("ultrascan_noexec_{}", std::process::id()));
        std::fs::write(&file, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(!probe_binary("probe", file.to_str().unwrap()).available);

        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(probe_binary("probe", file.to_str().unwrap()).available);
        assert!(!probe_binary("probe", "/tmp").available);
        let _ = std::fs::remove_file(file);
    }
}
