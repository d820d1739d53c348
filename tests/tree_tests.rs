mod common;

use std::fs::{self, File};
use std::path::Path;

use common::{read, Sandbox};
use veracity::{TreeOptions, Value};

fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (relative, content) in files {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

fn write_tar(path: &Path, files: &[(&str, &str)]) {
    let mut builder = tar::Builder::new(File::create(path).unwrap());
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, name, content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap();
}

#[test]
fn file_scrubber_rewrites_entry_content() {
    let sandbox = Sandbox::new();
    let root = sandbox.path().join("input");
    write_tree(&root, &[("TextDoc.txt", "Original text")]);

    let options = TreeOptions::new().file_scrubber(|path, text| {
        if path.ends_with("TextDoc.txt") {
            *text = "New text".to_string();
        }
    });
    let result = sandbox
        .verifier("scrubbed_dir")
        .verify_directory(&root, options)
        .unwrap();

    assert_eq!(
        read(&result.main().unwrap().received_path),
        "== TextDoc.txt ==\nNew text"
    );
}

#[test]
fn manifest_ignores_creation_order() {
    let sandbox = Sandbox::new();
    let first = sandbox.path().join("first");
    let second = sandbox.path().join("second");
    write_tree(&first, &[("b.txt", "b"), ("a/z.txt", "z"), ("a.txt", "a")]);
    write_tree(&second, &[("a.txt", "a"), ("b.txt", "b"), ("a/z.txt", "z")]);

    let verifier = sandbox.verifier("order");
    let one = verifier.verify_directory(&first, TreeOptions::new()).unwrap();
    let one_text = read(&one.main().unwrap().received_path);
    let two = verifier.verify_directory(&second, TreeOptions::new()).unwrap();
    let two_text = read(&two.main().unwrap().received_path);

    assert_eq!(one_text, two_text);
    assert_eq!(one_text, "== a.txt ==\na\n\n== a/z.txt ==\nz\n\n== b.txt ==\nb");
}

#[test]
fn approved_directory_snapshot_matches() {
    let sandbox = Sandbox::new();
    let root = sandbox.path().join("input");
    write_tree(&root, &[("config.json", "{\"id\": \"0f8fad5b-d9cb-469f-a165-70867728950e\"}")]);
    let verifier = sandbox.verifier("approved_dir");

    let first = verifier.verify_directory(&root, TreeOptions::new()).unwrap();
    let outcome = first.main().unwrap();
    assert_eq!(
        read(&outcome.received_path),
        "== config.json ==\n{\"id\": \"Guid_1\"}"
    );
    sandbox.approve(outcome);

    let second = verifier.verify_directory(&root, TreeOptions::new()).unwrap();
    assert!(second.is_success());
}

#[test]
fn info_and_pattern_apply_to_directories() {
    let sandbox = Sandbox::new();
    let root = sandbox.path().join("input");
    write_tree(&root, &[("keep.log", "kept"), ("skip.txt", "skipped"), ("nested/deep.log", "deep")]);

    let options = TreeOptions::new()
        .pattern("*.log")
        .unwrap()
        .recurse(false)
        .info(Value::object([("source", Value::from("nightly"))]));
    let result = sandbox
        .verifier("info_dir")
        .verify_directory(&root, options)
        .unwrap();

    assert_eq!(
        read(&result.main().unwrap().received_path),
        "Info: {\n  source: nightly\n}\n\n== keep.log ==\nkept"
    );
}

#[test]
fn tar_archives_fold_like_directories() {
    let sandbox = Sandbox::new();
    let archive = sandbox.path().join("bundle.tar");
    write_tar(&archive, &[("root.txt", "top"), ("docs/readme.txt", "read me")]);
    let verifier = sandbox.verifier("archive");

    let all = verifier.verify_archive(&archive, TreeOptions::new()).unwrap();
    assert_eq!(
        read(&all.main().unwrap().received_path),
        "== docs/readme.txt ==\nread me\n\n== root.txt ==\ntop"
    );

    let shallow = verifier
        .verify_archive(&archive, TreeOptions::new().recurse(false))
        .unwrap();
    assert_eq!(
        read(&shallow.main().unwrap().received_path),
        "== root.txt ==\ntop"
    );
}

#[test]
fn include_predicate_filters_archive_entries() {
    let sandbox = Sandbox::new();
    let archive = sandbox.path().join("bundle.tar");
    write_tar(&archive, &[("a.txt", "a"), ("b.txt", "b")]);

    let options = TreeOptions::new().include(|path| path != Path::new("a.txt"));
    let result = sandbox
        .verifier("include_archive")
        .verify_archive(&archive, options)
        .unwrap();
    assert_eq!(read(&result.main().unwrap().received_path), "== b.txt ==\nb");
}

#[test]
fn missing_archive_is_an_io_error() {
    let sandbox = Sandbox::new();
    let err = sandbox
        .verifier("missing")
        .verify_archive(sandbox.path().join("absent.tar"), TreeOptions::new())
        .unwrap_err();
    assert_eq!(err.error_type(), veracity::ErrorType::Io);
}
