//! End-to-end tests over synthetic MSG*.db / FTSContact.db archives.

use rusqlite::{Connection, params};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use wechat_chat_export::datasource::MessageStore;
use wechat_chat_export::exporter::csv_file_name;
use wechat_chat_export::parallel;
use wechat_chat_export::resolver::Resolver;
use wechat_chat_export::utils::{ExportConfig, TimeRange};

const GROUP: &str = "5566@chatroom";

fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn len_delimited(field: u64, body: &[u8], out: &mut Vec<u8>) {
    encode_varint((field << 3) | 2, out);
    encode_varint(body.len() as u64, out);
    out.extend_from_slice(body);
}

fn bytes_extra(pairs: &[(u64, &str)]) -> Vec<u8> {
    let mut out = Vec::new();
    len_delimited(1, &[0x08, 0x01], &mut out);
    for (id, value) in pairs {
        let mut inner = Vec::new();
        encode_varint(1 << 3, &mut inner);
        encode_varint(*id, &mut inner);
        len_delimited(2, value.as_bytes(), &mut inner);
        len_delimited(3, &inner, &mut out);
    }
    out
}

struct Row<'a> {
    server_id: i64,
    sequence: i64,
    create_time: i64,
    talker: &'a str,
    is_sender: bool,
    msg_type: i64,
    str_content: Option<&'a str>,
    compress_content: Option<Vec<u8>>,
    bytes_extra: Option<Vec<u8>>,
}

impl<'a> Row<'a> {
    fn text(server_id: i64, create_time: i64, talker: &'a str, content: &'a str) -> Self {
        Self {
            server_id,
            sequence: server_id,
            create_time,
            talker,
            is_sender: false,
            msg_type: 1,
            str_content: Some(content),
            compress_content: None,
            bytes_extra: None,
        }
    }
}

fn create_msg_db(path: &Path, talkers: &[&str], rows: &[Row<'_>]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE MSG (
            localId INTEGER PRIMARY KEY AUTOINCREMENT,
            MsgSvrID INT, Type INT, SubType INT, IsSender INT, CreateTime INT,
            Sequence INT DEFAULT 0, StrTalker TEXT, StrContent TEXT,
            CompressContent BLOB, BytesExtra BLOB
        );
        CREATE TABLE Name2ID (UsrName TEXT);",
    )
    .unwrap();
    for talker in talkers {
        conn.execute("INSERT INTO Name2ID (UsrName) VALUES (?1)", [talker])
            .unwrap();
    }
    for r in rows {
        conn.execute(
            "INSERT INTO MSG (MsgSvrID, Type, SubType, IsSender, CreateTime, Sequence,
                              StrTalker, StrContent, CompressContent, BytesExtra)
             VALUES (?1, ?2, 0, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                r.server_id,
                r.msg_type,
                r.is_sender as i64,
                r.create_time,
                r.sequence,
                r.talker,
                r.str_content,
                r.compress_content,
                r.bytes_extra,
            ],
        )
        .unwrap();
    }
}

fn create_contact_db(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "
        CREATE TABLE NameToId (userName TEXT);
        INSERT INTO NameToId (rowid, userName) VALUES
            (1, 'wxid_bob'), (2, 'wxid_carl'), (3, '5566@chatroom');

        CREATE TABLE FTSContact15_content (docid INTEGER PRIMARY KEY, c0alias TEXT, c1nickname TEXT, c2remark TEXT);
        CREATE TABLE FTSContact15_MetaData (docid INTEGER, entityId INTEGER);
        INSERT INTO FTSContact15_content VALUES
            (10, 'bob_a', 'Bob', 'Bobby'), (11, '', 'Carl', ''), (12, '', 'Hiking', '');
        INSERT INTO FTSContact15_MetaData VALUES (10, 1), (11, 2), (12, 3);

        CREATE TABLE FTSChatroom15_content (docid INTEGER PRIMARY KEY, c0groupRemark TEXT, c1nickname TEXT, c2alias TEXT);
        CREATE TABLE FTSChatroom15_MetaData (docid INTEGER, groupTalkerId INTEGER, talkerId INTEGER);
        INSERT INTO FTSChatroom15_content VALUES (20, '', 'Trail Carl', '');
        INSERT INTO FTSChatroom15_MetaData VALUES (20, 3, 2);
        ",
    )
    .unwrap();
}

/// A two-shard archive: private chat with Bob, a group, and a stranger.
fn build_archive(root: &Path) {
    let link_xml = "<?xml version=\"1.0\"?><msg><appmsg><title>Trip notes</title>\
                    <des>Day one</des><url>https://example.com/trip</url></appmsg></msg>";
    let compressed = lz4::block::compress(link_xml.as_bytes(), None, false).unwrap();

    let mut self_text = Row::text(1, 1_700_000_000, "wxid_bob", "  morning  ");
    self_text.is_sender = true;

    let mut image = Row::text(2, 1_700_000_100, "wxid_bob", "");
    image.msg_type = 3;
    image.str_content = Some("<msg><img length=\"10\"/></msg>");
    image.bytes_extra = Some(bytes_extra(&[
        (4, "wxid_me\\FileStorage\\Image\\a.dat"),
        (3, "wxid_me\\FileStorage\\Thumb\\a.dat"),
    ]));

    let mut link = Row::text(3, 1_700_000_050, GROUP, "");
    link.msg_type = 49;
    link.str_content = None;
    link.compress_content = Some(compressed);
    link.bytes_extra = Some(bytes_extra(&[(1, "wxid_carl")]));

    let mut anonymous = Row::text(4, 1_700_000_060, GROUP, "who am I");
    anonymous.bytes_extra = Some({
        let mut blob = bytes_extra(&[(1, "wxid_zoe")]);
        blob.truncate(blob.len() - 1);
        blob
    });

    create_msg_db(
        &root.join("Msg/MSG0.db"),
        &["wxid_bob", GROUP],
        &[self_text, image],
    );
    create_msg_db(
        &root.join("Msg/MSG1.db"),
        &[GROUP, "wxid_stranger"],
        &[
            link,
            anonymous,
            Row::text(5, 1_700_000_200, "wxid_bob", "later, from shard 1"),
            Row::text(6, 1_600_000_000, "wxid_stranger", "old"),
        ],
    );
    create_contact_db(&root.join("Msg/FTSContact.db"));
}

fn config(root: &Path, out: PathBuf) -> ExportConfig {
    ExportConfig {
        data_dir: root.to_path_buf(),
        output_dir: out,
        contact_db: None,
        talkers: None,
        range: TimeRange::default(),
        limit: None,
        workers: 3,
        self_label: None,
    }
}

fn read_csv(path: &Path) -> Vec<csv::StringRecord> {
    csv::Reader::from_path(path)
        .unwrap()
        .records()
        .map(|r| r.unwrap())
        .collect()
}

#[test]
fn test_store_merges_shards_in_time_order() {
    let dir = TempDir::new().unwrap();
    build_archive(dir.path());

    let store = MessageStore::open(dir.path()).unwrap();
    assert_eq!(store.message_dbs().len(), 2);
    assert_eq!(
        store.list_talkers().unwrap(),
        vec![GROUP, "wxid_bob", "wxid_stranger"]
    );

    let msgs = store
        .messages("wxid_bob", &TimeRange::default(), None)
        .unwrap();
    let ids: Vec<i64> = msgs.iter().map(|m| m.server_id).collect();
    assert_eq!(ids, vec![1, 2, 5]);

    let limited = store
        .messages("wxid_bob", &TimeRange::default(), Some(2))
        .unwrap();
    assert_eq!(limited.len(), 2);

    let range = TimeRange {
        start: Some(1_700_000_050),
        end: Some(1_700_000_150),
    };
    let ranged = store.messages("wxid_bob", &range, None).unwrap();
    assert_eq!(ranged.iter().map(|m| m.server_id).collect::<Vec<_>>(), vec![2]);
}

#[test]
fn test_private_chat_end_to_end() {
    let dir = TempDir::new().unwrap();
    build_archive(dir.path());
    let store = MessageStore::open(dir.path()).unwrap();

    let mut msgs = store
        .messages("wxid_bob", &TimeRange::default(), None)
        .unwrap();
    let contacts = wechat_chat_export::directory::load_contact_book(
        &dir.path().join("Msg/FTSContact.db"),
    )
    .unwrap();
    Resolver::new(contacts, Default::default()).resolve(&mut msgs);

    let first = &msgs[0];
    assert_eq!(first.sender, "self");
    assert_eq!(first.sender_display, "我");
    assert_eq!(first.content, "morning");
    assert_eq!(first.talker_display, "Bobby(wxid_bob)");

    let image = &msgs[1];
    assert_eq!(image.content, "");
    assert_eq!(image.raw_content, "<msg><img length=\"10\"/></msg>");
    assert_eq!(image.extras["image_path"], "FileStorage/Image/a.dat");
    assert_eq!(image.extras["thumb_path"], "FileStorage/Thumb/a.dat");
    assert_eq!(image.sender_display, "Bobby(wxid_bob)");
}

#[test]
fn test_full_export_writes_one_csv_per_conversation() {
    let dir = TempDir::new().unwrap();
    build_archive(dir.path());
    let out = dir.path().join("out");

    let summary = parallel::execute(&config(dir.path(), out.clone())).unwrap();
    assert!(summary.failed.is_empty(), "{:?}", summary.failed);
    assert_eq!(summary.exported.len(), 3);
    let talkers: Vec<&str> = summary.exported.iter().map(|(t, _)| t.as_str()).collect();
    assert_eq!(talkers, vec![GROUP, "wxid_bob", "wxid_stranger"]);

    let group_csv = &summary.exported[0].1;
    assert_eq!(
        group_csv.file_name().unwrap().to_string_lossy(),
        csv_file_name(GROUP, "Hiking(5566@chatroom)")
    );
    let rows = read_csv(group_csv);
    assert_eq!(rows.len(), 2);

    // columns: timestamp, talker_display, talker_id, sender_display, sender_id,
    //          message_type, message_subtype, content, raw_content, extras
    assert_eq!(&rows[0][1], "Hiking(5566@chatroom)");
    assert_eq!(&rows[0][3], "Trail Carl(wxid_carl)");
    assert_eq!(&rows[0][4], "wxid_carl");
    assert_eq!(&rows[0][5], "49");
    assert_eq!(&rows[0][7], "Trip notes | Day one");
    assert!(rows[0][8].contains("<appmsg>"));
    let extras: serde_json::Value = serde_json::from_str(&rows[0][9]).unwrap();
    assert_eq!(extras["url"], "https://example.com/trip");
    assert_eq!(extras["title"], "Trip notes");
    assert_eq!(extras["description"], "Day one");

    // Truncated side channel: no sender recovered, message still exported
    assert_eq!(&rows[1][4], "");
    assert_eq!(&rows[1][3], "");
    assert_eq!(&rows[1][7], "who am I");
}

#[test]
fn test_talker_selection_by_name() {
    let dir = TempDir::new().unwrap();
    build_archive(dir.path());
    let mut cfg = config(dir.path(), dir.path().join("out"));
    cfg.talkers = Some(vec!["bobby".into()]);
    cfg.self_label = Some("Me".into());

    let summary = parallel::execute(&cfg).unwrap();
    assert_eq!(summary.exported.len(), 1);
    let rows = read_csv(&summary.exported[0].1);
    assert_eq!(rows.len(), 3);
    assert_eq!(&rows[0][3], "Me");

    cfg.talkers = Some(vec!["nobody at all".into()]);
    assert!(parallel::execute(&cfg).is_err());
}

#[test]
fn test_talkers_naming_the_same_conversation_export_once() {
    let dir = TempDir::new().unwrap();
    build_archive(dir.path());
    let mut cfg = config(dir.path(), dir.path().join("out"));
    cfg.talkers = Some(vec!["bobby".into(), "BOB".into(), "wxid_bob".into()]);

    let summary = parallel::execute(&cfg).unwrap();
    assert_eq!(summary.exported.len(), 1);
    assert_eq!(summary.exported[0].0, "wxid_bob");
    assert_eq!(read_csv(&summary.exported[0].1).len(), 3);
}

#[test]
fn test_one_failing_conversation_does_not_stop_the_rest() {
    let dir = TempDir::new().unwrap();
    build_archive(dir.path());
    let out = dir.path().join("out");

    // Occupy the stranger's CSV path with a directory so its write fails.
    fs::create_dir_all(out.join(csv_file_name("wxid_stranger", "wxid_stranger"))).unwrap();

    let summary = parallel::execute(&config(dir.path(), out)).unwrap();
    assert_eq!(summary.exported.len(), 2);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, "wxid_stranger");
}

#[test]
fn test_missing_contact_db_still_exports() {
    let dir = TempDir::new().unwrap();
    build_archive(dir.path());
    fs::remove_file(dir.path().join("Msg/FTSContact.db")).unwrap();

    let summary = parallel::execute(&config(dir.path(), dir.path().join("out"))).unwrap();
    assert_eq!(summary.exported.len(), 3);
    let bob = summary
        .exported
        .iter()
        .find(|(t, _)| t == "wxid_bob")
        .unwrap();
    let rows = read_csv(&bob.1);
    assert_eq!(&rows[0][1], "wxid_bob");
    assert_eq!(&rows[2][3], "wxid_bob");
}

#[test]
fn test_cli_exits_with_failure_when_every_conversation_fails() {
    let dir = TempDir::new().unwrap();
    build_archive(dir.path());

    // Occupy every CSV path with a directory.
    let first = parallel::execute(&config(dir.path(), dir.path().join("first"))).unwrap();
    let out = dir.path().join("out");
    for (_, path) in &first.exported {
        fs::create_dir_all(out.join(path.file_name().unwrap())).unwrap();
    }
    let config_file = dir.path().join("config.toml");
    fs::write(&config_file, "").unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_wechat-chat-export"))
        .arg(dir.path())
        .arg("--output")
        .arg(&out)
        .arg("--config")
        .arg(&config_file)
        .arg("--quiet")
        .status()
        .unwrap();
    assert!(!status.success());
    assert_eq!(status.code(), Some(1));
}
