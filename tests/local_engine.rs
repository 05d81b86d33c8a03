#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use pumlgen::config::EngineSettings;
use pumlgen::diagram::Format;
use pumlgen::error::{EngineError, RenderError};
use pumlgen::render::{DiagramRenderer, LocalEngine, RenderEngine, RetryPolicy};

/// Stand-in for the PlantUML launcher: writes `<format>` plus the source
/// text to the `-ofile` destination.
const FAKE_ENGINE: &str = r#"#!/bin/sh
out=""
fmt=""
src=""
while [ $# -gt 0 ]; do
  case "$1" in
    -headless) ;;
    -ofile) shift; out="$1" ;;
    -t*) fmt="${1#-t}" ;;
    *) src="$1" ;;
  esac
  shift
done
printf '%s:' "$fmt" > "$out"
cat "$src" >> "$out"
"#;

const FAILING_ENGINE: &str = "#!/bin/sh\necho 'Syntax Error? (line 2)' >&2\nexit 3\n";

const HANGING_ENGINE: &str = "#!/bin/sh\nexec sleep 30\n";

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn engine(script: &Path, timeout: Duration) -> LocalEngine {
    LocalEngine::new(EngineSettings {
        command: vec!["sh".to_string(), script.display().to_string()],
        timeout,
        headless: true,
    })
}

fn source(dir: &Path) -> PathBuf {
    let path = dir.join("diagram1.puml");
    std::fs::write(&path, "@startuml\nA -> B\n@enduml\n").unwrap();
    path
}

#[tokio::test]
async fn test_engine_receives_format_destination_and_source() {
    let dir = tempfile::tempdir().unwrap();
    let script = script(dir.path(), "engine.sh", FAKE_ENGINE);
    let source = source(dir.path());
    let output = dir.path().join("out").join("diagram1");
    std::fs::create_dir_all(output.parent().unwrap()).unwrap();

    let renderer = DiagramRenderer::new(std::sync::Arc::new(engine(&script, Duration::from_secs(10))));
    let report = renderer.render(&source, Format::Png, &output).await.unwrap();

    assert_eq!(report.attempts, 1);
    let text = std::fs::read_to_string(&output).unwrap();
    assert_eq!(text, "png:@startuml\nA -> B\n@enduml\n");
}

#[tokio::test]
async fn test_engine_exit_status_and_stderr_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let script = script(dir.path(), "engine.sh", FAILING_ENGINE);
    let source = source(dir.path());
    let dest = dir.path().join("diagram1");

    let err = engine(&script, Duration::from_secs(10))
        .render_once(&source, Format::Svg, &dest)
        .await
        .unwrap_err();

    match err {
        EngineError::Failed { status, stderr } => {
            assert_eq!(status.code(), Some(3));
            assert_eq!(stderr, "Syntax Error? (line 2)");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_engine_exiting_does_not_take_the_renderer_down() {
    let dir = tempfile::tempdir().unwrap();
    let script = script(dir.path(), "engine.sh", FAILING_ENGINE);
    let source = source(dir.path());
    let output = dir.path().join("diagram1");

    let renderer = DiagramRenderer::new(std::sync::Arc::new(engine(&script, Duration::from_secs(10))))
        .with_policy(RetryPolicy::default().with_max_attempts(2));
    let err = renderer.render(&source, Format::Svg, &output).await.unwrap_err();

    assert!(matches!(err, RenderError::RetriesExhausted { attempts: 2, .. }));
    assert!(!output.exists());
}

#[tokio::test]
async fn test_hung_engine_is_killed_after_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let script = script(dir.path(), "engine.sh", HANGING_ENGINE);
    let source = source(dir.path());
    let dest = dir.path().join("diagram1");

    let started = std::time::Instant::now();
    let err = engine(&script, Duration::from_millis(300))
        .render_once(&source, Format::Svg, &dest)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Timeout(_)));
    assert!(started.elapsed() < Duration::from_secs(10));
}
