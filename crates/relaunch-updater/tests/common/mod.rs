//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::thread;

use flate2::write::GzEncoder;
use flate2::Compression;
use once_cell::sync::Lazy;
use relaunch_updater::crypto::{self, generate_private_key_with_bits};
use relaunch_updater::{FileEntry, Provider};
use rsa::RsaPrivateKey;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

/// Key that signs the fixtures.
pub static KEY_A: Lazy<RsaPrivateKey> = Lazy::new(|| generate_private_key_with_bits(2048).unwrap());

/// Unrelated key, for negative cases.
pub static KEY_B: Lazy<RsaPrivateKey> = Lazy::new(|| generate_private_key_with_bits(2048).unwrap());

pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

/// A small release tree: a version file, a nested binary, docs and an
/// empty directory.
pub fn create_release_tree(dir: &Path) {
    create_test_file(dir, "VERSION", b"v1.2.3\n");
    create_test_file(dir, "bin/tool", b"\x7fELF pretend binary");
    create_test_file(dir, "docs/readme.txt", b"read me");
    create_test_file(dir, "docs/nested/notes.md", b"# notes");
    fs::create_dir_all(dir.join("empty")).unwrap();
}

fn mode_of(path: &Path) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(path).unwrap().permissions().mode() & 0o7777
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        0o644
    }
}

/// Zip the contents of `src` into `dest`.
pub fn build_zip(src: &Path, dest: &Path) {
    let mut writer = zip::ZipWriter::new(File::create(dest).unwrap());

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.unwrap();
        let rel = entry
            .path()
            .strip_prefix(src)
            .unwrap()
            .to_string_lossy()
            .replace('\\', "/");
        let options = SimpleFileOptions::default().unix_permissions(mode_of(entry.path()));

        if entry.file_type().is_dir() {
            writer.add_directory(rel, options).unwrap();
        } else {
            writer.start_file(rel, options).unwrap();
            writer.write_all(&fs::read(entry.path()).unwrap()).unwrap();
        }
    }

    writer.finish().unwrap();
}

/// Tar and gzip the contents of `src` into `dest`.
pub fn build_tar_gz(src: &Path, dest: &Path) {
    let encoder = GzEncoder::new(File::create(dest).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(".", src).unwrap();
    builder.into_inner().unwrap().finish().unwrap();
}

/// Sign `dir` with `key` and write `signatures.json` into it.
pub fn sign_tree(dir: &Path, key: &RsaPrivateKey) {
    relaunch_updater::SignatureManifest::sign_folder(key, dir)
        .unwrap()
        .save_to_folder(dir)
        .unwrap();
}

pub fn checksum(path: &Path) -> String {
    crypto::checksum_file_hex(path).unwrap()
}

/// Every entry the provider yields, in walk order.
pub async fn collect_entries(provider: &dyn Provider) -> Vec<FileEntry> {
    let mut entries = Vec::new();
    provider
        .walk(&mut |entry: &FileEntry| {
            entries.push(entry.clone());
            Ok(())
        })
        .await
        .unwrap();
    entries
}

/// Retrieve every walked file (except `skip`) and compare it to `src`.
///
/// Returns the number of files compared.
pub async fn assert_round_trip(provider: &dyn Provider, src: &Path, skip: &[&str]) -> usize {
    let out = tempfile::TempDir::new().unwrap();
    let mut compared = 0;

    for entry in collect_entries(provider).await {
        if !entry.is_file() || skip.contains(&entry.path.as_str()) {
            continue;
        }
        let dest = out.path().join(format!("retrieved-{compared}"));
        provider.retrieve(&entry.path, &dest).await.unwrap();
        assert_eq!(
            fs::read(&dest).unwrap(),
            fs::read(src.join(&entry.path)).unwrap(),
            "content of {}",
            entry.path
        );
        compared += 1;
    }
    compared
}

/// Serve fixed bodies over plain HTTP from a background thread.
///
/// Keys of `routes` are request paths; anything else gets a 404. Returns the
/// base URL, e.g. `http://127.0.0.1:41234`. The thread lives until the test
/// process exits.
pub fn serve(routes: Vec<(String, Vec<u8>)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let routes: HashMap<String, Vec<u8>> = routes.into_iter().collect();

    thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => answer(stream, &routes),
                Err(_) => break,
            }
        }
    });
    base
}

fn answer(mut stream: TcpStream, routes: &HashMap<String, Vec<u8>>) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }

    let request = String::from_utf8_lossy(&request);
    let path = request.split_whitespace().nth(1).unwrap_or("/");
    let (status, body) = match routes.get(path) {
        Some(body) => ("200 OK", body.as_slice()),
        None => ("404 Not Found", &b"not found"[..]),
    };
    let header = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(body);
}
