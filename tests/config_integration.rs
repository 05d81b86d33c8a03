use std::time::Duration;

use pumlgen::config::{EngineOverrides, OptionOverrides, Project, Strategy};
use pumlgen::diagram::Format;
use pumlgen::error::ConfigError;

#[test]
fn test_declaration_file_parsing_accepts_json5() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pumlgen.json5");
    let content = r#"
// Diagrams for the architecture docs
{
  options: {
    outputDir: "out",
    format: "png",
    jobs: 2,
  },
  engine: {
    command: ["java", "-jar", "plantuml.jar"],
    timeoutSecs: 30,
  },
  diagrams: {
    diagram1: {},
    sequence: { sourceFile: "docs/seq.txt" },
  },
}
"#;
    std::fs::write(&path, content).unwrap();

    let project = Project::load(&path, &OptionOverrides::default(), &EngineOverrides::default()).unwrap();

    assert_eq!(project.options.output_dir, dir.path().join("out"));
    assert_eq!(project.options.format, Format::Png);
    assert_eq!(project.options.jobs, 2);
    assert_eq!(project.engine.command, vec!["java", "-jar", "plantuml.jar"]);
    assert_eq!(project.engine.timeout, Duration::from_secs(30));

    let diagrams: Vec<_> = project
        .diagrams()
        .iter()
        .map(|d| (d.name().to_string(), d.source_file().to_path_buf()))
        .collect();
    assert_eq!(
        diagrams,
        vec![
            ("diagram1".to_string(), dir.path().join("diagram1.puml")),
            ("sequence".to_string(), dir.path().join("docs/seq.txt")),
        ]
    );
}

#[test]
fn test_cli_overrides_win_over_file_options() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pumlgen.json5");
    std::fs::write(
        &path,
        r#"{ options: { format: "png", outputDir: "out", strategy: "remote" } }"#,
    )
    .unwrap();

    let cli = OptionOverrides {
        format: Some("TXT".to_string()),
        suffix: Some(true),
        ..OptionOverrides::default()
    };
    let project = Project::load(&path, &cli, &EngineOverrides::default()).unwrap();

    assert_eq!(project.options.format, Format::Txt);
    assert_eq!(project.options.strategy, Strategy::Remote);
    assert!(project.options.suffix);
    assert_eq!(
        project.options.output_path("diagram1"),
        dir.path().join("out").join("diagram1.txt")
    );
}

#[test]
fn test_missing_declaration_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pumlgen.json5");

    let project = Project::load(&path, &OptionOverrides::default(), &EngineOverrides::default()).unwrap();

    assert!(project.diagrams().is_empty());
    assert_eq!(project.options.format, Format::Svg);
    assert_eq!(project.options.strategy, Strategy::Local);
    assert_eq!(
        project.options.output_dir,
        dir.path().join("build").join("plantuml")
    );
    assert_eq!(project.engine.command, vec!["plantuml".to_string()]);
}

#[test]
fn test_unknown_format_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pumlgen.json5");
    std::fs::write(&path, r#"{ options: { format: "xyz" }, diagrams: { a: {} } }"#).unwrap();

    let err = Project::load(&path, &OptionOverrides::default(), &EngineOverrides::default()).unwrap_err();
    assert!(matches!(err, ConfigError::UnknownFormat(ref f) if f == "xyz"));
}

#[test]
fn test_unknown_declaration_keys_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pumlgen.json5");
    std::fs::write(&path, r#"{ options: { colour: "red" } }"#).unwrap();

    let err = Project::load(&path, &OptionOverrides::default(), &EngineOverrides::default()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn test_invalid_diagram_name_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pumlgen.json5");
    std::fs::write(&path, r#"{ diagrams: { "../escape": {} } }"#).unwrap();

    let err = Project::load(&path, &OptionOverrides::default(), &EngineOverrides::default()).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidName(..)));
}

#[test]
fn test_sources_resolved_relative_to_declaration() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pumlgen.json5");
    std::fs::write(&path, r#"{ sources: "docs/diagrams" }"#).unwrap();

    let project = Project::load(&path, &OptionOverrides::default(), &EngineOverrides::default()).unwrap();
    assert_eq!(project.sources, Some(dir.path().join("docs/diagrams")));
}

#[test]
fn test_empty_engine_command_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pumlgen.json5");
    std::fs::write(&path, "{}").unwrap();

    let engine = EngineOverrides {
        command: Some(Vec::new()),
        ..EngineOverrides::default()
    };
    let err = Project::load(&path, &OptionOverrides::default(), &engine).unwrap_err();
    assert!(matches!(err, ConfigError::MissingField("engine.command")));
}
