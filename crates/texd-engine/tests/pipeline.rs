#![cfg(unix)]

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use texd_engine::{
    BundleRequest, CompileRequest, EngineConfig, Pipeline, WORKSPACE_PREFIX,
};

fn make_temp_dir(tag: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    for n in 0..10_000u32 {
        let p = base.join(format!("texd-pipe-test-{tag}-{pid}-{n}"));
        if std::fs::create_dir(&p).is_ok() {
            return p;
        }
    }
    panic!("failed to create temp dir under {}", base.display());
}

/// Writes an executable stub standing in for pdflatex. The stub answers the
/// `--version` probe with exit 0 and otherwise runs `body` with `$2` bound
/// to the entry filename (after `-interaction=nonstopmode`).
fn write_stub(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt as _;
    let path = dir.join(name);
    let script = format!(
        "#!/bin/sh\nif [ \"$1\" = \"--version\" ]; then echo \"stubTeX 1.0\"; exit 0; fi\nentry=\"$2\"\nbase=\"${{entry%.tex}}\"\n{body}\n"
    );
    std::fs::write(&path, script).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn config(tex_bin: PathBuf, tmp_root: PathBuf) -> EngineConfig {
    EngineConfig {
        tex_bin,
        tmp_root,
        wall_ms: 10_000,
        ..EngineConfig::default()
    }
}

fn assert_no_workspace_leak(tmp_root: &Path) {
    let leaked: Vec<_> = std::fs::read_dir(tmp_root)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .starts_with(WORKSPACE_PREFIX)
        })
        .map(|e| e.path())
        .collect();
    assert!(leaked.is_empty(), "leaked workspaces: {leaked:?}");
}

#[test]
fn successful_compile_returns_pdf_and_runs_two_passes() {
    let dir = make_temp_dir("ok");
    let counter = dir.join("passes.txt");
    let body = format!(
        "echo \"This is stubTeX, pass over $entry\"\necho pass >> {}\nprintf '%%PDF-1.4 stub\\n' > \"$base.pdf\"\nexit 0",
        counter.display()
    );
    let stub = write_stub(&dir, "stubtex", &body);
    let tmp_root = dir.join("tmp");
    let pipeline = Pipeline::new(config(stub, tmp_root.clone()));

    let outcome = pipeline
        .compile_source(&CompileRequest {
            source: "\\documentclass{article}\\begin{document}X\\end{document}".to_string(),
            filename: "doc".to_string(),
            assets_dir: None,
        })
        .unwrap();

    assert!(outcome.success);
    assert!(!outcome.timed_out);
    assert_eq!(outcome.artifact_name, "doc.pdf");
    let pdf = outcome.pdf.expect("artifact bytes");
    assert!(pdf.starts_with(b"%PDF"));
    assert!(outcome.log.contains("doc.tex"));

    let passes = std::fs::read_to_string(&counter).unwrap();
    assert_eq!(passes.lines().count(), 2, "expected exactly two passes");

    assert_no_workspace_leak(&tmp_root);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn failing_compile_carries_log_and_no_artifact() {
    let dir = make_temp_dir("fail");
    let body = "echo \"! Undefined control sequence.\"\nprintf '%s\\n' 'l.1 \\bogus' 1>&2\nexit 1";
    let stub = write_stub(&dir, "stubtex", body);
    let tmp_root = dir.join("tmp");
    let pipeline = Pipeline::new(config(stub, tmp_root.clone()));

    let outcome = pipeline
        .compile_source(&CompileRequest {
            source: "\\documentclass{article}\\begin{document}{X\\end{document}".to_string(),
            filename: "doc".to_string(),
            assets_dir: None,
        })
        .unwrap();

    assert!(!outcome.success);
    assert!(outcome.pdf.is_none());
    assert!(outcome.log.contains("Undefined control sequence"));
    assert!(outcome.log.contains("bogus"));

    assert_no_workspace_leak(&tmp_root);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn zero_exit_without_artifact_is_a_failure() {
    let dir = make_temp_dir("lie");
    let stub = write_stub(&dir, "stubtex", "echo \"all good, honest\"\nexit 0");
    let tmp_root = dir.join("tmp");
    let pipeline = Pipeline::new(config(stub, tmp_root.clone()));

    let outcome = pipeline
        .compile_source(&CompileRequest {
            source: "x".to_string(),
            filename: "doc".to_string(),
            assets_dir: None,
        })
        .unwrap();

    assert!(!outcome.success, "exit code alone must not be trusted");
    assert!(outcome.pdf.is_none());

    assert_no_workspace_leak(&tmp_root);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn timeout_is_reported_and_cleaned_up() {
    let dir = make_temp_dir("timeout");
    let counter = dir.join("passes.txt");
    let body = format!("echo pass >> {}\necho warming up\nsleep 30", counter.display());
    let stub = write_stub(&dir, "stubtex", &body);
    let tmp_root = dir.join("tmp");
    let mut cfg = config(stub, tmp_root.clone());
    cfg.wall_ms = 300;
    let pipeline = Pipeline::new(cfg);

    let outcome = pipeline
        .compile_source(&CompileRequest {
            source: "x".to_string(),
            filename: "doc".to_string(),
            assets_dir: None,
        })
        .unwrap();

    assert!(!outcome.success);
    assert!(outcome.timed_out);
    assert!(outcome.log.contains("wall-clock timeout"));
    // Partial output captured before the kill is preserved.
    assert!(outcome.log.contains("warming up"));
    // A timed-out first pass is not retried.
    let passes = std::fs::read_to_string(&counter).unwrap();
    assert_eq!(passes.lines().count(), 1);

    assert_no_workspace_leak(&tmp_root);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn asset_collection_is_staged_into_workspace() {
    let dir = make_temp_dir("assets");
    let body = "if [ ! -f fig.png ]; then echo \"missing fig.png\" 1>&2; exit 3; fi\nprintf '%%PDF-1.4 stub\\n' > \"$base.pdf\"\nexit 0";
    let stub = write_stub(&dir, "stubtex", body);
    let assets = dir.join("collection");
    std::fs::create_dir(&assets).unwrap();
    std::fs::write(assets.join("fig.png"), b"pngbytes").unwrap();
    let tmp_root = dir.join("tmp");
    let pipeline = Pipeline::new(config(stub, tmp_root.clone()));

    let outcome = pipeline
        .compile_source(&CompileRequest {
            source: "x".to_string(),
            filename: "doc".to_string(),
            assets_dir: Some(assets),
        })
        .unwrap();
    assert!(outcome.success, "log: {}", outcome.log);

    assert_no_workspace_leak(&tmp_root);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn zip_bundle_resolves_main_tex_and_compiles() {
    let dir = make_temp_dir("zip");
    let body = "printf '%%PDF-1.4 stub\\n' > \"$base.pdf\"\nexit 0";
    let stub = write_stub(&dir, "stubtex", body);
    let tmp_root = dir.join("tmp");
    let pipeline = Pipeline::new(config(stub, tmp_root.clone()));

    let bundle = BundleRequest::Files(vec![
        (PathBuf::from("chapter1.tex"), b"chapter".to_vec()),
        (PathBuf::from("main.tex"), b"main".to_vec()),
    ]);
    let outcome = pipeline.compile_bundle(&bundle, None, None).unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.artifact_name, "main.pdf");

    assert_no_workspace_leak(&tmp_root);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn bundle_without_source_fails_before_any_invocation() {
    let dir = make_temp_dir("nosrc");
    let counter = dir.join("passes.txt");
    let body = format!("echo pass >> {}\nexit 0", counter.display());
    let stub = write_stub(&dir, "stubtex", &body);
    let tmp_root = dir.join("tmp");
    let pipeline = Pipeline::new(config(stub, tmp_root.clone()));

    let zip = {
        let mut buf = std::io::Cursor::new(Vec::new());
        let mut w = zip::ZipWriter::new(&mut buf);
        let opts = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        w.start_file("readme.txt", opts).unwrap();
        w.write_all(b"no tex here").unwrap();
        w.finish().unwrap();
        buf.into_inner()
    };

    let err = pipeline
        .compile_bundle(&BundleRequest::Zip(zip), None, None)
        .err()
        .expect("must fail");
    assert!(matches!(err, texd_engine::CompileError::NoEntryPoint));
    assert!(!counter.exists(), "compiler must not have been invoked");

    assert_no_workspace_leak(&tmp_root);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_compiler_is_a_distinct_failure() {
    let dir = make_temp_dir("missing");
    let tmp_root = dir.join("tmp");
    std::fs::create_dir(&tmp_root).unwrap();
    let pipeline = Pipeline::new(config(
        PathBuf::from("/nonexistent/texd-no-such-binary"),
        tmp_root.clone(),
    ));

    let err = pipeline
        .compile_source(&CompileRequest {
            source: "x".to_string(),
            filename: "doc".to_string(),
            assets_dir: None,
        })
        .err()
        .expect("must fail");
    assert!(matches!(err, texd_engine::CompileError::CompilerMissing(_)));

    assert_no_workspace_leak(&tmp_root);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn capacity_floor_short_circuits_before_admission() {
    let dir = make_temp_dir("capacity");
    let stub = write_stub(&dir, "stubtex", "exit 0");
    let tmp_root = dir.join("tmp");
    std::fs::create_dir(&tmp_root).unwrap();
    let mut cfg = config(stub, tmp_root.clone());
    cfg.min_free_disk_bytes = u64::MAX;
    let pipeline = Pipeline::new(cfg);

    if texd_engine::gate::free_disk_bytes(&tmp_root).is_none() {
        return; // probe unsupported here, nothing to assert
    }
    let err = pipeline
        .compile_source(&CompileRequest {
            source: "x".to_string(),
            filename: "doc".to_string(),
            assets_dir: None,
        })
        .err()
        .expect("must fail");
    assert!(matches!(err, texd_engine::CompileError::Capacity { .. }));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn concurrent_requests_respect_the_admission_bound() {
    let dir = make_temp_dir("bound");
    let marker_dir = dir.join("inflight");
    let peak_file = dir.join("peaks.txt");
    std::fs::create_dir(&marker_dir).unwrap();
    // Track concurrently-running stub invocations via marker dirs; each
    // records how many are live while it runs. Counts can only undershoot,
    // never overshoot, so any value above the bound is a real violation.
    let body = format!(
        "mkdir \"{marker}/$$\"\nls \"{marker}\" | wc -l >> \"{peaks}\"\nsleep 0.2\nrmdir \"{marker}/$$\"\nprintf '%%PDF-1.4 stub\\n' > \"$base.pdf\"\nexit 0",
        marker = marker_dir.display(),
        peaks = peak_file.display()
    );
    let stub = write_stub(&dir, "stubtex", &body);
    let tmp_root = dir.join("tmp");
    let mut cfg = config(stub, tmp_root.clone());
    cfg.max_concurrent = 2;
    let pipeline = Arc::new(Pipeline::new(cfg));

    let mut handles = Vec::new();
    for i in 0..6 {
        let pipeline = Arc::clone(&pipeline);
        handles.push(std::thread::spawn(move || {
            pipeline.compile_source(&CompileRequest {
                source: "x".to_string(),
                filename: format!("doc{i}"),
                assets_dir: None,
            })
        }));
    }
    for h in handles {
        let outcome = h.join().unwrap().unwrap();
        assert!(outcome.success);
    }

    let peaks = std::fs::read_to_string(&peak_file).unwrap();
    for line in peaks.lines() {
        let n: usize = line.trim().parse().unwrap();
        assert!(n <= 2, "admission bound violated: {n} in flight");
    }

    assert_no_workspace_leak(&tmp_root);
    let _ = std::fs::remove_dir_all(&dir);
}
