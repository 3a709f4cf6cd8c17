use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use killagram_types::api::FolderRequest;
use killagram_types::error::{CoreResult, NotFound, PolicyViolation};
use killagram_types::models::{ChatSummary, ConversationSummary, Folder};

use crate::lock;
use crate::views::chat_summary;

pub const SYSTEM_FOLDER_IDS: [&str; 3] = ["all", "unread", "saved"];

pub fn is_system_folder(id: &str) -> bool {
    SYSTEM_FOLDER_IDS.contains(&id)
}

fn system_folder(id: &str, title: &str, order: i32, chat_ids: Vec<String>) -> Folder {
    Folder {
        id: id.into(),
        title: title.into(),
        include_types: Vec::new(),
        chat_ids,
        order,
        is_system: true,
        emoji_id: None,
        emoji_fallback: None,
    }
}

pub fn system_folders() -> Vec<Folder> {
    vec![
        system_folder("all", "All", -100, Vec::new()),
        system_folder("unread", "Unread", -90, Vec::new()),
        system_folder("saved", "Saved", -80, vec!["-1".into()]),
    ]
}

/// User-defined chat folders. The system folders are not stored; they are
/// synthesized on every read and cannot be changed.
#[derive(Default)]
pub struct FolderStore {
    inner: Mutex<HashMap<String, Vec<Folder>>>,
}

fn check_emoji(request: &FolderRequest, premium: bool) -> CoreResult<()> {
    if request.emoji_id.is_some() && !premium {
        return Err(PolicyViolation::PremiumRequired.into());
    }
    Ok(())
}

impl FolderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// System folders first, then the user's folders by `order`.
    pub fn list(&self, user: &str) -> Vec<Folder> {
        let mut own = lock(&self.inner).get(user).cloned().unwrap_or_default();
        own.sort_by_key(|folder| folder.order);

        let mut folders = system_folders();
        folders.extend(own);
        folders
    }

    pub fn get(&self, user: &str, id: &str) -> CoreResult<Folder> {
        if let Some(folder) = system_folders().into_iter().find(|f| f.id == id) {
            return Ok(folder);
        }
        lock(&self.inner)
            .get(user)
            .and_then(|folders| folders.iter().find(|f| f.id == id).cloned())
            .ok_or(NotFound::Folder.into())
    }

    /// Custom emoji icons are a premium feature.
    pub fn create(&self, user: &str, request: FolderRequest, premium: bool) -> CoreResult<Folder> {
        check_emoji(&request, premium)?;

        let folder = Folder {
            id: Uuid::new_v4().to_string(),
            title: request.title,
            include_types: request.include_types,
            chat_ids: request.chat_ids,
            order: request.order,
            is_system: false,
            emoji_id: request.emoji_id,
            emoji_fallback: request.emoji_fallback,
        };
        lock(&self.inner)
            .entry(user.to_string())
            .or_default()
            .push(folder.clone());
        Ok(folder)
    }

    pub fn update(
        &self,
        user: &str,
        id: &str,
        request: FolderRequest,
        premium: bool,
    ) -> CoreResult<Folder> {
        if is_system_folder(id) {
            return Err(PolicyViolation::SystemFolderImmutable.into());
        }
        check_emoji(&request, premium)?;

        let mut inner = lock(&self.inner);
        let folder = inner
            .get_mut(user)
            .and_then(|folders| folders.iter_mut().find(|f| f.id == id))
            .ok_or(NotFound::Folder)?;

        folder.title = request.title;
        folder.include_types = request.include_types;
        folder.chat_ids = request.chat_ids;
        folder.order = request.order;
        folder.emoji_id = request.emoji_id;
        folder.emoji_fallback = request.emoji_fallback;
        Ok(folder.clone())
    }

    pub fn delete(&self, user: &str, id: &str) -> CoreResult<()> {
        if is_system_folder(id) {
            return Err(PolicyViolation::SystemFolderImmutable.into());
        }

        let mut inner = lock(&self.inner);
        let folders = inner.get_mut(user).ok_or(NotFound::Folder)?;
        let before = folders.len();
        folders.retain(|f| f.id != id);
        if folders.len() == before {
            return Err(NotFound::Folder.into());
        }
        Ok(())
    }
}

/// Chats shown in `folder`, Saved Messages first.
///
/// `saved` holds only Saved Messages, `unread` skips read chats, and a custom
/// folder with neither types nor chat ids shows everything.
pub fn filter_conversations(folder: &Folder, conversations: &[ConversationSummary]) -> Vec<ChatSummary> {
    let mut chats = vec![ChatSummary::saved_messages()];
    if folder.id == "saved" {
        return chats;
    }

    let custom = !matches!(folder.id.as_str(), "all" | "unread");
    let constrained = !folder.include_types.is_empty() || !folder.chat_ids.is_empty();

    for conversation in conversations {
        if folder.id == "unread" && conversation.unread_count == 0 {
            continue;
        }
        if custom && constrained {
            let by_type = folder.include_types.contains(&conversation.kind);
            let by_id = folder.chat_ids.contains(&conversation.id.0.to_string());
            if !(by_type || by_id) {
                continue;
            }
        }
        chats.push(chat_summary(conversation));
    }
    chats
}

#[cfg(test)]
mod tests {
    use super::*;
    use killagram_types::CoreError;
    use killagram_types::models::{ConversationId, ConversationKind};

    fn request(title: &str, order: i32) -> FolderRequest {
        FolderRequest {
            title: title.into(),
            include_types: Vec::new(),
            chat_ids: Vec::new(),
            order,
            emoji_id: None,
            emoji_fallback: None,
        }
    }

    fn conversation(id: i64, kind: ConversationKind, unread: u32) -> ConversationSummary {
        ConversationSummary {
            id: ConversationId(id),
            title: format!("chat {id}"),
            unread_count: unread,
            last_message: None,
            kind,
        }
    }

    #[test]
    fn system_folders_come_first_then_by_order() {
        let store = FolderStore::new();
        store.create("u", request("b", 5), false).unwrap();
        store.create("u", request("a", 1), false).unwrap();

        let titles: Vec<_> = store.list("u").into_iter().map(|f| f.title).collect();
        assert_eq!(titles, ["All", "Unread", "Saved", "a", "b"]);
    }

    #[test]
    fn system_folders_are_immutable() {
        let store = FolderStore::new();
        assert_eq!(
            store.delete("u", "all").unwrap_err(),
            CoreError::Policy(PolicyViolation::SystemFolderImmutable)
        );
        assert_eq!(
            store.update("u", "saved", request("x", 0), true).unwrap_err(),
            CoreError::Policy(PolicyViolation::SystemFolderImmutable)
        );
        assert_eq!(
            store.delete("u", "missing").unwrap_err(),
            CoreError::NotFound(NotFound::Folder)
        );
    }

    #[test]
    fn emoji_requires_premium() {
        let store = FolderStore::new();
        let mut req = request("x", 0);
        req.emoji_id = Some("5368324170671202286".into());
        assert_eq!(
            store.create("u", req.clone(), false).unwrap_err(),
            CoreError::Policy(PolicyViolation::PremiumRequired)
        );
        assert!(store.create("u", req, true).is_ok());
    }

    #[test]
    fn folder_filters() {
        let chats = [
            conversation(1, ConversationKind::Private, 0),
            conversation(2, ConversationKind::Groups, 3),
            conversation(3, ConversationKind::Channels, 0),
        ];
        let ids = |folder: &Folder| -> Vec<i64> {
            filter_conversations(folder, &chats).into_iter().map(|c| c.id).collect()
        };

        let system = system_folders();
        assert_eq!(ids(&system[0]), [-1, 1, 2, 3]);
        assert_eq!(ids(&system[1]), [-1, 2]);
        assert_eq!(ids(&system[2]), [-1]);

        let store = FolderStore::new();
        let mut req = request("groups", 0);
        req.include_types = vec![ConversationKind::Groups];
        req.chat_ids = vec!["3".into()];
        let folder = store.create("u", req, false).unwrap();
        assert_eq!(ids(&folder), [-1, 2, 3]);

        let everything = store.create("u", request("all mine", 0), false).unwrap();
        assert_eq!(ids(&everything), [-1, 1, 2, 3]);
    }
}
