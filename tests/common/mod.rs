//! Common utilities for integration tests
//!
//! Builds `docker save`-style image tarballs in temporary directories so the
//! archive-backed sources can be exercised without a container engine.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tar_rs as tar;

pub const CONFIG_HASH: &str = "c0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ffeec0ff";
pub const BASE_LAYER_HASH: &str =
    "1111111111111111111111111111111111111111111111111111111111111111";
pub const APP_LAYER_HASH: &str =
    "2222222222222222222222222222222222222222222222222222222222222222";

#[allow(dead_code)]
pub const FIXTURE_TAG: &str = "fixture/app:1.0";

/// Config blob of the fixture image: a base layer, an app layer and two metadata-only steps.
pub const FIXTURE_CONFIG: &str = r#"{
    "architecture": "amd64",
    "os": "linux",
    "config": {
        "Env": ["PATH=/usr/bin", "BROKEN"],
        "Entrypoint": ["/bin/sh", "-c"],
        "Cmd": ["/app/run.sh"],
        "WorkingDir": "/app",
        "ExposedPorts": {"8080/tcp": {}}
    },
    "history": [
        {
            "created": "2023-01-01T00:00:00Z",
            "created_by": "/bin/sh -c #(nop) ADD file:base in / "
        },
        {
            "created": "2023-01-01T00:00:10Z",
            "created_by": "/bin/sh -c #(nop)  CMD [\"sh\"]",
            "empty_layer": true
        },
        {
            "created": "2023-01-02T00:00:00Z",
            "created_by": "/bin/sh -c mkdir /app && echo hi > /app/run.sh",
            "comment": "app setup"
        },
        {
            "created": "2023-01-02T00:00:10Z",
            "created_by": "/bin/sh -c #(nop) WORKDIR /app",
            "empty_layer": true
        }
    ],
    "rootfs": {
        "type": "layers",
        "diff_ids": [
            "sha256:1111111111111111111111111111111111111111111111111111111111111111",
            "sha256:2222222222222222222222222222222222222222222222222222222222222222"
        ]
    }
}"#;

fn append_bytes<W: std::io::Write>(builder: &mut tar::Builder<W>, path: &str, content: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();
    builder
        .append_data(&mut header, path, content)
        .expect("append tar entry");
}

/// In-memory layer tarball with the given `(path, content)` files.
pub fn layer_tar(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, content) in files {
        append_bytes(&mut builder, path, content.as_bytes());
    }
    builder.into_inner().expect("finish layer tar")
}

/// Writes an image tarball with a single-image `manifest.json` and returns its path.
pub fn write_image_tarball(
    dir: &Path,
    config: &str,
    repo_tags: &[&str],
    layers: &[(&str, Vec<u8>)],
) -> PathBuf {
    let config_path = format!("blobs/sha256/{}", CONFIG_HASH);
    let layer_paths: Vec<String> = layers
        .iter()
        .map(|(hash, _)| format!("blobs/sha256/{}", hash))
        .collect();

    let manifest = serde_json::json!([{
        "Config": &config_path,
        "RepoTags": repo_tags,
        "Layers": &layer_paths,
    }]);

    let tarball_path = dir.join("image.tar");
    let mut builder = tar::Builder::new(File::create(&tarball_path).expect("create tarball"));
    append_bytes(&mut builder, "manifest.json", manifest.to_string().as_bytes());
    append_bytes(&mut builder, &config_path, config.as_bytes());
    for (path, (_, content)) in layer_paths.iter().zip(layers) {
        append_bytes(&mut builder, path, content);
    }
    builder.finish().expect("finish image tarball");

    tarball_path
}

/// The fixture image: base layer with a scratch file the app layer whites out.
pub fn write_fixture_image(dir: &Path) -> PathBuf {
    let base = layer_tar(&[
        ("etc/os-release", "ID=fixture"),
        ("tmp/junk", "remove me"),
    ]);
    let app = layer_tar(&[("app/run.sh", "echo hi"), ("tmp/.wh.junk", "")]);

    write_image_tarball(
        dir,
        FIXTURE_CONFIG,
        &[FIXTURE_TAG],
        &[(BASE_LAYER_HASH, base), (APP_LAYER_HASH, app)],
    )
}

#[allow(dead_code)]
pub fn read(path: &Path) -> String {
    fs::read_to_string(path).expect("read file")
}
