use quack_ocr::{config::Config, engine::Profile};

#[test]
fn parse_example_config() {
    let raw = include_str!("../quack-ocr.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    assert_eq!(cfg.server.port, 8080);
    assert_eq!(cfg.server.default_profile, Profile::Standard);
    assert_eq!(cfg.docling.ocr.langs, vec!["en".to_string()]);
    assert_eq!(cfg.docling.env.get("OMP_NUM_THREADS").map(String::as_str), Some("4"));
    assert!(!cfg.paths.scripts_dir.is_empty());
}

#[test]
fn empty_file_is_all_defaults() {
    let cfg: Config = toml::from_str("").expect("parse TOML");
    assert_eq!(cfg.server.port, 8080);
    assert_eq!(cfg.docling.accelerator.num_threads, 4);
}

#[test]
fn one_key_sections_keep_remaining_defaults() {
    let cfg: Config = toml::from_str("[server]\nport = 9000\n").expect("parse TOML");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.server.host.to_string(), "0.0.0.0");
    assert_eq!(cfg.server.shutdown_timeout_seconds, 30);

    let cfg: Config = toml::from_str(
        "[docling]\npython_exe = \"/opt/docling/bin/python\"\n\n[docling.ocr]\nengine = \"easyocr\"\n\n[postprocess]\nremove_by_regex = true\n",
    )
    .expect("parse TOML");
    assert_eq!(cfg.docling.python_exe, "/opt/docling/bin/python");
    assert_eq!(cfg.docling.timeout_seconds, 0);
    assert_eq!(cfg.docling.ocr.engine, "easyocr");
    assert_eq!(cfg.docling.ocr.langs, vec!["en".to_string()]);
    assert!(cfg.postprocess.remove_by_regex);
    assert!(cfg.postprocess.normalize_newlines);
    assert!(cfg.postprocess.regex.patterns.is_empty());
}
