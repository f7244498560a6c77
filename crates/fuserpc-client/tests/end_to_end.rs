//! Client and server talking over a real TCP connection.

use fuserpc_client::{Channel, ClientConfig, RemoteFileSystem, RemoteService};
use fuserpc_core::abi::{EntryOut, InHeader, OpenIn, OpenOut, ROOT_ID, ReadIn, ReleaseIn, StatfsOut};
use fuserpc_core::dirent::{parse_dirents, parse_dirents_plus};
use fuserpc_core::{Cancel, DirEntryList, RawFileSystem, Status};
use fuserpc_server::{FileSystemServer, LoopbackFileSystem, RpcServer, ServerConfig};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;
use tokio::runtime::Runtime;

/// Reports fixed filesystem statistics and nothing else.
struct FixedStatFs;

impl RawFileSystem for FixedStatFs {
    fn string(&self) -> String {
        "fixed".into()
    }

    fn stat_fs(&self, _cancel: &Cancel, _header: &InHeader, out: &mut StatfsOut) -> Status {
        *out = StatfsOut {
            blocks: 1000,
            bfree: 500,
            bavail: 400,
            files: 100,
            ffree: 50,
            bsize: 4096,
            ..StatfsOut::default()
        };
        Status::OK
    }
}

/// Lists one entry whose name is Latin-1, not UTF-8.
struct Latin1Dir;

const LATIN1_NAME: &[u8] = b"caf\xe9";

impl RawFileSystem for Latin1Dir {
    fn read_dir(&self, _cancel: &Cancel, _input: &ReadIn, out: &mut DirEntryList) -> Status {
        let _ = out.append_entry(5, LATIN1_NAME, 8, 0);
        Status::OK
    }

    fn read_dir_plus(&self, _cancel: &Cancel, _input: &ReadIn, out: &mut DirEntryList) -> Status {
        let entry_out = EntryOut {
            node_id: 5,
            ..EntryOut::default()
        };
        let _ = out.append_lookup_entry(5, LATIN1_NAME, 8, 0, &entry_out);
        Status::OK
    }
}

fn serve<F: RawFileSystem + 'static>(rt: &Runtime, fs: F) -> (RpcServer, RemoteFileSystem<RemoteService>) {
    let server = rt
        .block_on(RpcServer::start(FileSystemServer::new(fs), ServerConfig::default()))
        .unwrap();
    let channel = rt.block_on(Channel::connect(server.local_addr())).unwrap();
    let client = RemoteFileSystem::with_config(
        channel.into_service(),
        rt.handle().clone(),
        ClientConfig::default().call_timeout(Duration::from_secs(10)),
    );
    (server, client)
}

fn loopback() -> (TempDir, LoopbackFileSystem) {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("somefile"), b"remote contents").unwrap();
    fs::create_dir(dir.path().join("subdir")).unwrap();
    let lfs = LoopbackFileSystem::new(dir.path()).unwrap();
    (dir, lfs)
}

#[test]
fn test_lookup_matches_loopback() {
    let rt = Runtime::new().unwrap();
    let (dir, lfs) = loopback();
    let (server, client) = serve(&rt, lfs);

    let mut remote = EntryOut::default();
    let status = client.lookup(&Cancel::never(), &InHeader::for_node(ROOT_ID), "somefile", &mut remote);
    assert_eq!(status, Status::OK);

    // A second loopback over the same directory reports the same node.
    let local_fs = LoopbackFileSystem::new(dir.path()).unwrap();
    let mut local = EntryOut::default();
    local_fs.lookup(&Cancel::never(), &InHeader::for_node(ROOT_ID), "somefile", &mut local);

    assert_eq!(remote.node_id, local.node_id);
    assert_eq!(remote.attr.mode, local.attr.mode);
    assert_eq!(remote.attr.ino, local.attr.ino);
    assert_eq!(remote.attr.size, 15);

    let mut missing = EntryOut::default();
    let status = client.lookup(&Cancel::never(), &InHeader::for_node(ROOT_ID), "nope", &mut missing);
    assert_eq!(status, Status::ENOENT);

    rt.block_on(server.stop());
}

#[test]
fn test_statfs_from_backend() {
    let rt = Runtime::new().unwrap();
    let (server, client) = serve(&rt, FixedStatFs);

    let mut out = StatfsOut::default();
    assert_eq!(client.stat_fs(&Cancel::never(), &InHeader::for_node(ROOT_ID), &mut out), Status::OK);
    assert_eq!(
        (out.blocks, out.bfree, out.bavail, out.files, out.ffree, out.bsize),
        (1000, 500, 400, 100, 50, 4096)
    );
    assert_eq!(client.string(), "fixed");

    // Everything else is unimplemented on the backend.
    let mut entry = EntryOut::default();
    let status = client.lookup(&Cancel::never(), &InHeader::for_node(ROOT_ID), "x", &mut entry);
    assert_eq!(status, Status::ENOSYS);

    rt.block_on(server.stop());
}

#[test]
fn test_read_and_list_over_the_wire() {
    let rt = Runtime::new().unwrap();
    let (_dir, lfs) = loopback();
    let (server, client) = serve(&rt, lfs);
    let c = Cancel::never();

    let mut entry = EntryOut::default();
    assert_eq!(client.lookup(&c, &InHeader::for_node(ROOT_ID), "somefile", &mut entry), Status::OK);
    let mut opened = OpenOut::default();
    let open_in = OpenIn {
        header: InHeader::for_node(entry.node_id),
        ..OpenIn::default()
    };
    assert_eq!(client.open(&c, &open_in, &mut opened), Status::OK);

    let mut buf = vec![0u8; 4096];
    let read_in = ReadIn {
        header: InHeader::for_node(entry.node_id),
        fh: opened.fh,
        offset: 7,
        size: 4096,
        ..ReadIn::default()
    };
    let n = client.read(&c, &read_in, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"contents");
    client.release(
        &c,
        &ReleaseIn {
            fh: opened.fh,
            ..ReleaseIn::default()
        },
    );

    let mut dir = OpenOut::default();
    let open_dir = OpenIn {
        header: InHeader::for_node(ROOT_ID),
        ..OpenIn::default()
    };
    assert_eq!(client.open_dir(&c, &open_dir, &mut dir), Status::OK);
    let mut list = DirEntryList::with_capacity(4096, 0);
    let list_in = ReadIn {
        header: InHeader::for_node(ROOT_ID),
        fh: dir.fh,
        size: 4096,
        ..ReadIn::default()
    };
    assert_eq!(client.read_dir(&c, &list_in, &mut list), Status::OK);
    let mut names: Vec<String> = parse_dirents(list.as_bytes())
        .map(|(_, r)| String::from_utf8_lossy(r.name).into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec![".", "..", "somefile", "subdir"]);
    client.release_dir(&ReleaseIn {
        fh: dir.fh,
        ..ReleaseIn::default()
    });

    rt.block_on(server.stop());
}

#[test]
fn test_dial_fails_after_shutdown() {
    let rt = Runtime::new().unwrap();
    let (server, client) = serve(&rt, FixedStatFs);
    let addr = server.local_addr();
    assert_eq!(client.string(), "fixed");

    rt.block_on(server.stop());

    let err = rt.block_on(Channel::connect(addr)).unwrap_err();
    assert!(err.is_unreachable());

    // The existing connection is gone too; calls surface as I/O errors.
    let mut out = StatfsOut::default();
    let status = client.stat_fs(&Cancel::never(), &InHeader::for_node(ROOT_ID), &mut out);
    assert_eq!(status, Status::EIO);
    assert_eq!(client.string(), fuserpc_client::DEFAULT_NAME);
}

#[test]
fn test_non_utf8_names_cross_the_wire() {
    let rt = Runtime::new().unwrap();
    let (server, client) = serve(&rt, Latin1Dir);
    let list_in = ReadIn {
        header: InHeader::for_node(ROOT_ID),
        size: 4096,
        ..ReadIn::default()
    };

    let mut list = DirEntryList::with_capacity(4096, 0);
    assert_eq!(client.read_dir(&Cancel::never(), &list_in, &mut list), Status::OK);
    let names: Vec<&[u8]> = parse_dirents(list.as_bytes()).map(|(_, r)| r.name).collect();
    assert_eq!(names, vec![LATIN1_NAME]);

    let mut list = DirEntryList::with_capacity(4096, 0);
    assert_eq!(client.read_dir_plus(&Cancel::never(), &list_in, &mut list), Status::OK);
    let (entry_out, record) = parse_dirents_plus(list.as_bytes()).next().expect("one entry");
    assert_eq!(record.name, LATIN1_NAME);
    assert_eq!(entry_out.map(|e| e.node_id), Some(5));

    rt.block_on(server.stop());
}
