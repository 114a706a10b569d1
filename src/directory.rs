//! Contact book and group member directory, read from `FTSContact.db`.

use crate::model::{ContactRecord, GroupMemberRecord};
use crate::resolver::{ContactBook, GroupDirectory};
use crate::utils::open_db;
use eyre::{Context, Result, eyre};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

pub const CONTACT_DB_NAME: &str = "FTSContact.db";

const CONTACTS_SQL: &str = "
    SELECT n.userName,
           IFNULL(c.c0alias, ''),
           IFNULL(c.c1nickname, ''),
           IFNULL(c.c2remark, '')
    FROM FTSContact15_content AS c
    JOIN FTSContact15_MetaData AS m ON m.docid = c.docid
    JOIN NameToId AS n ON n.rowid = m.entityId";

const GROUP_MEMBERS_SQL: &str = "
    SELECT chat.userName,
           member.userName,
           IFNULL(c.c0groupRemark, ''),
           IFNULL(c.c1nickname, ''),
           IFNULL(c.c2alias, '')
    FROM FTSChatroom15_content AS c
    JOIN FTSChatroom15_MetaData AS m ON m.docid = c.docid
    LEFT JOIN NameToId AS chat ON chat.rowid = m.groupTalkerId
    LEFT JOIN NameToId AS member ON member.rowid = m.talkerId
    WHERE chat.userName IS NOT NULL AND member.userName IS NOT NULL";

/// `data_dir/FTSContact.db`, else `data_dir/Msg/FTSContact.db`. When neither exists the
/// first candidate is returned and loading yields empty tables.
pub fn find_contact_db(data_dir: &Path) -> PathBuf {
    let candidates = [
        data_dir.join(CONTACT_DB_NAME),
        data_dir.join("Msg").join(CONTACT_DB_NAME),
    ];
    candidates
        .iter()
        .find(|p| p.exists())
        .unwrap_or(&candidates[0])
        .clone()
}

pub fn load_contact_book(db_path: &Path) -> Result<ContactBook> {
    let mut contacts = HashMap::new();
    if !db_path.exists() {
        return Ok(contacts);
    }

    let conn = open_db(db_path)?;
    let mut stmt = conn
        .prepare(CONTACTS_SQL)
        .wrap_err("Failed to prepare contact query")?;
    let rows = stmt.query_map([], |row| {
        Ok(ContactRecord {
            username: row.get(0)?,
            alias: row.get(1)?,
            nickname: row.get(2)?,
            remark: row.get(3)?,
        })
    })?;
    for contact in rows {
        let contact = contact.wrap_err("Failed to read contact row")?;
        contacts.insert(contact.username.clone(), contact);
    }
    Ok(contacts)
}

pub fn load_group_directory(db_path: &Path) -> Result<GroupDirectory> {
    let mut members = HashMap::new();
    if !db_path.exists() {
        return Ok(members);
    }

    let conn = open_db(db_path)?;
    let mut stmt = conn
        .prepare(GROUP_MEMBERS_SQL)
        .wrap_err("Failed to prepare group member query")?;
    let rows = stmt.query_map([], |row| {
        Ok(GroupMemberRecord {
            chatroom: row.get(0)?,
            member: row.get(1)?,
            group_remark: row.get(2)?,
            nickname: row.get(3)?,
            alias: row.get(4)?,
        })
    })?;
    for member in rows {
        let member = member.wrap_err("Failed to read group member row")?;
        members.insert((member.chatroom.clone(), member.member.clone()), member);
    }
    Ok(members)
}

/// Map user input (raw ids, remarks, nicknames or `name(id)` labels) to talker ids.
pub fn resolve_talker_inputs(
    inputs: &[String],
    contacts: &ContactBook,
    available: &[String],
) -> Result<Vec<String>> {
    let available: HashSet<&str> = available.iter().map(String::as_str).collect();

    let mut by_name: HashMap<String, &str> = HashMap::new();
    for contact in contacts.values() {
        let label = contact.label();
        let names = [
            contact.best_name(),
            contact.alias.as_str(),
            contact.nickname.as_str(),
            contact.remark.as_str(),
            label.as_str(),
        ];
        for name in names.into_iter().filter(|n| !n.is_empty()) {
            by_name.insert(name.to_lowercase(), contact.username.as_str());
        }
    }

    let lookup = |key: &str| {
        by_name
            .get(&key.to_lowercase())
            .copied()
            .filter(|id| available.contains(id))
    };

    inputs
        .iter()
        .map(|input| {
            let candidate = input.trim();
            if available.contains(candidate) {
                return Ok(candidate.to_string());
            }
            let before_paren = candidate.split('(').next().unwrap_or_default().trim();
            lookup(candidate)
                .or_else(|| lookup(before_paren))
                .map(str::to_string)
                .ok_or_else(|| eyre!("Could not resolve conversation: {}", input))
        })
        .collect()
}
