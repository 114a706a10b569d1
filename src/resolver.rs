//! Human readable labels for talkers and senders.

use crate::model::{ContactRecord, DEFAULT_SELF_LABEL, GroupMemberRecord, NormalizedMessage};
use std::collections::HashMap;

pub type ContactBook = HashMap<String, ContactRecord>;
pub type GroupDirectory = HashMap<(String, String), GroupMemberRecord>;

/// Read-only lookup tables shared by every conversation of an export.
#[derive(Debug, Clone)]
pub struct Resolver {
    contacts: ContactBook,
    group_members: GroupDirectory,
    self_label: String,
}

impl Resolver {
    pub fn new(contacts: ContactBook, group_members: GroupDirectory) -> Self {
        Self {
            contacts,
            group_members,
            self_label: DEFAULT_SELF_LABEL.to_string(),
        }
    }

    /// Label used for the archive owner.
    pub fn with_self_label(mut self, label: impl Into<String>) -> Self {
        self.self_label = label.into();
        self
    }

    pub fn contacts(&self) -> &ContactBook {
        &self.contacts
    }

    pub fn contact_label(&self, identifier: &str) -> String {
        match self.contacts.get(identifier) {
            Some(contact) => contact.label(),
            None => identifier.to_string(),
        }
    }

    /// Fill `talker_display` and `sender_display` of every message.
    pub fn resolve(&self, messages: &mut [NormalizedMessage]) {
        for msg in messages {
            msg.talker_display = self.contact_label(&msg.talker);

            let display = if msg.is_chatroom {
                self.group_sender_label(&msg.talker, &msg.sender)
            } else if msg.is_self {
                self.self_label.clone()
            } else {
                self.contact_label(&msg.sender)
            };

            msg.sender_display = if !display.is_empty() {
                display
            } else if !msg.sender.is_empty() || !msg.is_self {
                msg.sender.clone()
            } else {
                self.self_label.clone()
            };
        }
    }

    fn group_sender_label(&self, chatroom: &str, sender: &str) -> String {
        let contact = self.contacts.get(sender);
        let member = self
            .group_members
            .get(&(chatroom.to_string(), sender.to_string()));

        let name = match member {
            Some(member) => member.best_name(contact),
            None => contact.map(ContactRecord::best_name).unwrap_or_default(),
        };
        if name.is_empty() {
            return sender.to_string();
        }

        // A known contact's own username wins over the raw sender id.
        // TODO: confirm against real archives whether the two can differ in format.
        let base = contact.map_or(sender, |c| c.username.as_str());
        if name == base {
            name.to_string()
        } else {
            format!("{}({})", name, base)
        }
    }
}
