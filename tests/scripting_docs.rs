//! Test that all Rhai code blocks in docs/scripting.md load and evaluate.
//!
//! Run with: cargo test --test scripting_docs

use std::fs;

use paramview::config::SandboxLimits;
use paramview::param_extract::extract;
use paramview::params::ParameterSnapshot;
use paramview::script_log::ScriptLogger;
use paramview::scripting::{ScriptRuntime, UserScript};

/// Extract all Rhai code blocks from markdown content
fn extract_rhai_blocks(content: &str) -> Vec<(usize, String)> {
    let mut blocks = Vec::new();
    let mut in_rhai_block = false;
    let mut current_block = String::new();
    let mut block_start_line = 0;

    for (line_num, line) in content.lines().enumerate() {
        if line.trim().starts_with("```rhai") {
            in_rhai_block = true;
            block_start_line = line_num + 1;
            current_block.clear();
        } else if in_rhai_block && line.trim() == "```" {
            in_rhai_block = false;
            blocks.push((block_start_line, current_block.clone()));
        } else if in_rhai_block {
            current_block.push_str(line);
            current_block.push('\n');
        }
    }

    blocks
}

#[test]
fn test_all_rhai_blocks_evaluate() {
    let scripting_md_path = concat!(env!("CARGO_MANIFEST_DIR"), "/docs/scripting.md");
    let content = fs::read_to_string(scripting_md_path).expect("Failed to read scripting.md");

    let blocks = extract_rhai_blocks(&content);
    assert!(!blocks.is_empty(), "No Rhai code blocks found in scripting.md");

    let mut errors = Vec::new();

    for (line_num, block) in &blocks {
        // Fresh runtime per block so nothing leaks between examples
        let mut runtime = ScriptRuntime::new(&SandboxLimits::default(), ScriptLogger::default());
        let script = UserScript::new(block.clone()).with_filename(format!("scripting.md:{line_num}"));

        let result = extract(block)
            .map_err(|e| e.to_string())
            .and_then(|descriptors| runtime.load(&script, descriptors).map_err(|e| e.to_string()))
            .and_then(|()| {
                runtime
                    .evaluate(&ParameterSnapshot::new())
                    .map_err(|e| e.to_string())
            });

        match result {
            Ok(evaluation) => {
                if evaluation.animated {
                    if let Err(e) = runtime.animate(0.5) {
                        errors.push(format!("Line {}: animate failed: {}", line_num, e));
                    }
                }
            }
            Err(e) => errors.push(format!("Line {}: {}\n---\n{}", line_num, e, block)),
        }
    }

    if !errors.is_empty() {
        panic!(
            "{} of {} Rhai blocks in scripting.md failed:\n\n{}",
            errors.len(),
            blocks.len(),
            errors.join("\n\n")
        );
    }
}

#[test]
fn documented_schema_matches_extraction() {
    let content = fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/docs/scripting.md"))
        .expect("Failed to read scripting.md");
    let blocks = extract_rhai_blocks(&content);
    let declared = blocks
        .iter()
        .find(|(_, block)| block.contains("let parameters"))
        .expect("docs should show a parameters block");

    let descriptors = extract(&declared.1).unwrap();
    let keys: Vec<_> = descriptors.iter().map(|d| d.key.as_str()).collect();
    assert_eq!(keys, ["radius", "color", "hollow"]);
    assert_eq!(descriptors[0].label, "Radius");
}
