//! Install pipeline tests: resolve, cache and extract against a mock feed.

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use mockito::{Matcher, Mock, Server, ServerGuard};
use reqwest::Client;
use tempfile::TempDir;
use upack_core::{ArtifactOrigin, ErrorClass, InstallRequest, Registry, install};
use upack_schema::{PackageIdentifier, RegistryScope};
use zip::write::SimpleFileOptions;

fn package_zip() -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    zip.start_file("upack.json", options).unwrap();
    zip.write_all(br#"{"group":"tools","name":"hdars","version":"1.1.0"}"#)
        .unwrap();
    zip.start_file("package/bin/hdars", options).unwrap();
    zip.write_all(b"binary v1.1.0").unwrap();
    zip.start_file("package/share/readme.md", options).unwrap();
    zip.write_all(b"# hdars").unwrap();
    zip.finish().unwrap().into_inner()
}

struct Feed {
    server: ServerGuard,
    versions: Mock,
    download: Mock,
}

async fn feed(downloads: usize) -> Feed {
    let mut server = Server::new_async().await;
    let versions = server
        .mock("GET", "/packages")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("group".into(), "tools".into()),
            Matcher::UrlEncoded("name".into(), "hdars".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"versions":["1.0.0","1.1.0","2.0.0-beta"]}"#)
        .create_async()
        .await;
    let download = server
        .mock("GET", "/download/tools/hdars/1.1.0")
        .with_status(200)
        .with_body(package_zip())
        .expect(downloads)
        .create_async()
        .await;
    Feed {
        server,
        versions,
        download,
    }
}

fn request(feed: &Feed, registry: &Path, target: &Path) -> InstallRequest {
    InstallRequest {
        package: PackageIdentifier::parse("tools:hdars").unwrap(),
        version: None,
        source: feed.server.url(),
        credentials: None,
        target: target.to_path_buf(),
        overwrite: false,
        prerelease: false,
        comment: Some("integration".into()),
        scope: RegistryScope::User,
        unregistered: false,
        registry_root: Some(registry.to_path_buf()),
        installed_by: "tester".into(),
    }
}

fn snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(&current).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let bytes = fs::read(&path).unwrap();
                files.push((path.strip_prefix(dir).unwrap().to_path_buf(), bytes));
            }
        }
    }
    files.sort();
    files
}

#[tokio::test]
async fn second_install_is_served_from_cache() {
    let feed = feed(1).await;
    let sandbox = TempDir::new().unwrap();
    let registry = sandbox.path().join("registry");
    let first_target = sandbox.path().join("first");
    let second_target = sandbox.path().join("second");

    let client = Client::new();
    let first = install(&client, &request(&feed, &registry, &first_target))
        .await
        .unwrap();
    let second = install(&client, &request(&feed, &registry, &second_target))
        .await
        .unwrap();

    assert_eq!(first.version.to_string(), "1.1.0");
    assert_eq!(first.origin, ArtifactOrigin::Downloaded);
    assert!(second.cache_hit());
    assert_eq!(first.summary.files, 2);
    assert_eq!(first.manifest.unwrap().name, "hdars");
    assert_eq!(snapshot(&first_target), snapshot(&second_target));
    assert_eq!(
        fs::read(first_target.join("bin/hdars")).unwrap(),
        b"binary v1.1.0"
    );

    feed.download.assert_async().await;
    feed.versions.assert_async().await;

    let entries = Registry::at(&registry, RegistryScope::User).entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].installed_by, "tester");
    assert_eq!(entries[0].install_path.as_deref(), Some(second_target.as_path()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_installs_download_once() {
    let feed = feed(1).await;
    let sandbox = TempDir::new().unwrap();
    let registry = sandbox.path().join("registry");
    let client = Client::new();

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let client = client.clone();
            let mut req = request(&feed, &registry, &sandbox.path().join(format!("t{i}")));
            req.version = Some("1.1.0".into());
            tokio::spawn(async move { install(&client, &req).await.unwrap() })
        })
        .collect();

    let mut downloaded = 0;
    for task in tasks {
        if task.await.unwrap().origin == ArtifactOrigin::Downloaded {
            downloaded += 1;
        }
    }

    assert_eq!(downloaded, 1);
    feed.download.assert_async().await;
    let reference = snapshot(&sandbox.path().join("t0"));
    for i in 1..8 {
        assert_eq!(snapshot(&sandbox.path().join(format!("t{i}"))), reference);
    }
}

#[tokio::test]
async fn unregistered_install_bypasses_registry() {
    let feed = feed(2).await;
    let sandbox = TempDir::new().unwrap();
    let registry = sandbox.path().join("registry");
    let target = sandbox.path().join("out");

    let mut req = request(&feed, &registry, &target);
    req.unregistered = true;
    let client = Client::new();
    let first = install(&client, &req).await.unwrap();
    req.overwrite = true;
    let second = install(&client, &req).await.unwrap();

    assert_eq!(first.origin, ArtifactOrigin::Feed);
    assert_eq!(second.origin, ArtifactOrigin::Feed);
    assert!(!registry.exists());
    assert!(target.join("share/readme.md").exists());
    feed.download.assert_async().await;
}

#[tokio::test]
async fn reinstall_without_overwrite_keeps_local_edits() {
    let feed = feed(1).await;
    let sandbox = TempDir::new().unwrap();
    let registry = sandbox.path().join("registry");
    let target = sandbox.path().join("out");
    let client = Client::new();

    install(&client, &request(&feed, &registry, &target)).await.unwrap();
    fs::write(target.join("bin/hdars"), b"patched").unwrap();

    let again = install(&client, &request(&feed, &registry, &target)).await.unwrap();
    assert_eq!(again.summary.skipped, 2);
    assert_eq!(fs::read(target.join("bin/hdars")).unwrap(), b"patched");

    let mut forced = request(&feed, &registry, &target);
    forced.overwrite = true;
    install(&client, &forced).await.unwrap();
    assert_eq!(fs::read(target.join("bin/hdars")).unwrap(), b"binary v1.1.0");
}

#[tokio::test]
async fn missing_version_is_not_found() {
    let mut server = Server::new_async().await;
    let _m = server
        .mock("GET", "/download/tools/hdars/9.9.9")
        .with_status(404)
        .create_async()
        .await;
    let sandbox = TempDir::new().unwrap();

    let req = InstallRequest {
        package: PackageIdentifier::parse("tools:hdars").unwrap(),
        version: Some("9.9.9".into()),
        source: server.url(),
        credentials: None,
        target: sandbox.path().join("out"),
        overwrite: false,
        prerelease: false,
        comment: None,
        scope: RegistryScope::Machine,
        unregistered: false,
        registry_root: Some(sandbox.path().join("registry")),
        installed_by: "tester".into(),
    };
    let err = install(&Client::new(), &req).await.unwrap_err();

    assert_eq!(err.class(), ErrorClass::NotFound);
    assert!(!sandbox.path().join("out").exists());
    let entries = Registry::at(sandbox.path().join("registry"), RegistryScope::Machine)
        .entries()
        .unwrap();
    assert!(entries.is_empty());
}
