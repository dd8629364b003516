use std::fs;
use std::path::{Path, PathBuf};

/// Files allowed to talk to the terminal directly.
const TERMINAL_FILES: &[&str] = &["main.rs", "console.rs"];

fn main() {
    println!("cargo:rerun-if-changed=src");

    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR missing");
    let src_dir = Path::new(&manifest_dir).join("src");

    let mut files = Vec::new();
    collect_rs_files(&src_dir, &mut files);
    for path in files {
        let is_terminal = path
            .file_name()
            .and_then(|s| s.to_str())
            .map(|name| TERMINAL_FILES.contains(&name))
            .unwrap_or(false);
        if is_terminal {
            continue;
        }
        let contents = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
        enforce_library_guards(&contents, &path);
    }
}

fn collect_rs_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rs_files(&path, files);
        } else if path.extension().and_then(|s| s.to_str()) == Some("rs") {
            files.push(path);
        }
    }
}

/// Library code logs through `tracing` and keeps shared state behind
/// `Arc`, never in mutable statics.
fn enforce_library_guards(contents: &str, path: &Path) {
    let forbidden = [
        "println!(",
        "eprintln!(",
        "dbg!(",
        "static mut",
        "lazy_static!",
    ];

    for token in forbidden {
        if contents.contains(token) {
            panic!(
                "Forbidden token `{}` in library module: {}",
                token,
                path.display()
            );
        }
    }
}
