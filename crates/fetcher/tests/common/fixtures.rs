//! Test fixtures for archives, packages and registry content.

use flate2::Compression;
use flate2::write::GzEncoder;
use parcel_core::package::{PackageSpec, PackageStatus};
use parcel_core::{Archive, BuildStatus, Checksum, Package, ResourceMeta};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Write};
use std::net::TcpListener;
use zip::write::{SimpleFileOptions, ZipWriter};

/// Whether httpmock can listen on the loopback interface.
#[allow(dead_code)]
pub fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

/// Compute SHA-256 hash of data as hex string.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub fn sha256_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    result.iter().map(|b| format!("{:02x}", b)).collect()
}

/// A gzip-compressed tarball of regular files.
#[allow(dead_code)]
pub fn tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// A zip archive of regular files.
#[allow(dead_code)]
pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in files {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[allow(dead_code)]
pub fn meta(namespace: &str, name: &str) -> ResourceMeta {
    ResourceMeta {
        name: name.to_string(),
        namespace: namespace.to_string(),
    }
}

/// A package whose source and deployment are both `archive`.
#[allow(dead_code)]
pub fn package_json(name: &str, archive: Archive, build_status: BuildStatus) -> Value {
    let package = Package {
        metadata: meta("default", name),
        spec: PackageSpec {
            source: archive.clone(),
            deployment: archive,
        },
        status: PackageStatus { build_status },
    };
    serde_json::to_value(package).unwrap()
}

#[allow(dead_code)]
pub fn literal_archive(data: &[u8]) -> Archive {
    Archive {
        literal: data.to_vec(),
        ..Archive::default()
    }
}

#[allow(dead_code)]
pub fn url_archive(url: String, sum: &str) -> Archive {
    Archive {
        url,
        checksum: Some(Checksum::sha256(sum)),
        ..Archive::default()
    }
}

#[allow(dead_code)]
pub fn image_archive(image: &str) -> Archive {
    Archive {
        image: image.to_string(),
        ..Archive::default()
    }
}

/// An image manifest listing `layers` (each a tar.gz blob) bottom to top.
#[allow(dead_code)]
pub fn image_manifest(layers: &[&[u8]]) -> Value {
    let descriptors: Vec<Value> = layers
        .iter()
        .map(|blob| {
            json!({
                "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                "digest": format!("sha256:{}", sha256_hash(blob)),
                "size": blob.len(),
            })
        })
        .collect();
    json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
        "config": {
            "mediaType": "application/vnd.docker.container.image.v1+json",
            "digest": format!("sha256:{}", sha256_hash(b"{}")),
            "size": 2,
        },
        "layers": descriptors,
    })
}
