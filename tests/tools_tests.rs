//! The command-line tools: the header inliner and the denoising harness.

use pixelflow::apps::ImageFile;
use pixelflow::bench::MAX_AUTO_SLOWDOWN;
use pixelflow::tools::{inline_headers, HeaderInliner};
use std::fs;
use std::path::Path;
use std::process::Command;

fn write_header_chain(dir: &Path) {
    fs::write(dir.join("c.h"), "int c;\n").unwrap();
    fs::write(dir.join("b.h"), "#include \"c.h\"\nint b;\n#include \"c.h\"\n").unwrap();
    fs::write(dir.join("a.h"), "#include \"b.h\"\n#include \"c.h\"\nint a;\n#include \"b.h\"\n").unwrap();
}

#[test]
fn test_header_chain_emitted_once() {
    let dir = tempfile::tempdir().unwrap();
    write_header_chain(dir.path());

    let a = dir.path().join("a.h");
    let out = inline_headers(&[&a, &a], Vec::new()).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "int c;\nint b;\nint a;\n");

    // Naming an already inlined header again adds nothing.
    let mut inliner = HeaderInliner::new(Vec::new());
    inliner.inline(dir.path().join("c.h")).unwrap();
    inliner.inline(&a).unwrap();
    assert_eq!(String::from_utf8(inliner.into_inner()).unwrap(), "int c;\nint b;\nint a;\n");
}

#[test]
fn test_build_header_binary() {
    let dir = tempfile::tempdir().unwrap();
    write_header_chain(dir.path());

    let output = Command::new(env!("CARGO_BIN_EXE_build_header"))
        .arg(dir.path().join("a.h"))
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "int c;\nint b;\nint a;\n");

    let missing = dir.path().join("missing.h");
    let output = Command::new(env!("CARGO_BIN_EXE_build_header")).arg(&missing).output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains(&format!("Could not open header {}.", missing.display())));
}

fn reported_ms(stdout: &str, label: &str) -> f64 {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix(label))
        .and_then(|rest| rest.trim().trim_end_matches("ms").parse().ok())
        .unwrap_or_else(|| panic!("no {:?} line in {:?}", label, stdout))
}

#[test]
fn test_process_harness() {
    let dir = tempfile::tempdir().unwrap();
    let (width, height) = (9, 7);
    let mut image = ImageFile::new(width, height, 3);
    for (i, v) in image.data.iter_mut().enumerate() {
        *v = ((i * 29) % 13) as f32 / 12.0;
    }
    let input = dir.path().join("input.json");
    let output = dir.path().join("output.json");
    image.save(&input).unwrap();

    let result = Command::new(env!("CARGO_BIN_EXE_process"))
        .arg(&input)
        .args(["7", "7", "0.12", "2"])
        .arg(&output)
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&result.stdout);

    let manual = reported_ms(&stdout, "Manually-tuned time:");
    let auto = reported_ms(&stdout, "Auto-scheduled time:");
    assert_eq!(result.status.success(), auto <= manual * MAX_AUTO_SLOWDOWN, "{}", stdout);

    let denoised = ImageFile::load(&output).unwrap();
    assert_eq!((denoised.width, denoised.height, denoised.channels), (width, height, 3));
    assert!(denoised.data.iter().all(|v| (0.0..=1.0).contains(v)));
}

#[test]
fn test_process_rejects_missing_input() {
    let dir = tempfile::tempdir().unwrap();
    let result = Command::new(env!("CARGO_BIN_EXE_process"))
        .arg(dir.path().join("nope.json"))
        .args(["7", "7", "0.12", "1"])
        .arg(dir.path().join("out.json"))
        .output()
        .unwrap();
    assert!(!result.status.success());
}
