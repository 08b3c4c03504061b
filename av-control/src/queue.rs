//! Playback queue of a renderer.

use serde::{Deserialize, Serialize};

use crate::didl::DidlObject;
use crate::error::{ControlError, Result};

/// A media server object scheduled for playback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackItem {
    /// UDN of the media server holding the object
    pub server_udn: String,
    pub object_id: String,
    pub title: String,
    pub album: Option<String>,
    pub artist: Option<String>,
    /// Album art URI
    pub image: Option<String>,
}

impl PlaybackItem {
    pub fn new(server_udn: impl Into<String>, object_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            server_udn: server_udn.into(),
            object_id: object_id.into(),
            title: title.into(),
            album: None,
            artist: None,
            image: None,
        }
    }

    /// Item for a browsed object of `server_udn`
    pub fn from_object(server_udn: impl Into<String>, object: &DidlObject) -> Self {
        Self {
            server_udn: server_udn.into(),
            object_id: object.id.clone(),
            title: object.title.clone(),
            album: object.album.clone(),
            artist: object.artist.clone(),
            image: object.album_art_uri.clone(),
        }
    }
}

/// Ordered items plus a cursor.
///
/// The cursor is either unset or a valid index. Walking past the last item
/// unsets it and exhausts the queue: `next_item` keeps returning `None` until
/// the items change or the cursor is placed explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackQueue {
    items: Vec<PlaybackItem>,
    current_item_index: Option<usize>,
    #[serde(skip)]
    exhausted: bool,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[PlaybackItem] {
        &self.items
    }

    pub fn current_item_index(&self) -> Option<usize> {
        self.current_item_index
    }

    pub fn current_item(&self) -> Option<&PlaybackItem> {
        self.current_item_index.and_then(|index| self.items.get(index))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn append(&mut self, items: impl IntoIterator<Item = PlaybackItem>) {
        self.items.extend(items);
        self.exhausted = false;
    }

    /// Replace all items and unset the cursor
    pub fn replace(&mut self, items: impl IntoIterator<Item = PlaybackItem>) {
        self.items = items.into_iter().collect();
        self.current_item_index = None;
        self.exhausted = false;
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.current_item_index = None;
        self.exhausted = false;
    }

    /// Whether `next_item` would return an item
    pub fn has_next(&self) -> bool {
        if self.exhausted {
            return false;
        }
        match self.current_item_index {
            Some(index) => index + 1 < self.items.len(),
            None => !self.items.is_empty(),
        }
    }

    /// Advance the cursor and return the item under it
    pub fn next_item(&mut self) -> Option<PlaybackItem> {
        if self.exhausted {
            return None;
        }
        let next = self.current_item_index.map_or(0, |index| index + 1);
        match self.items.get(next) {
            Some(item) => {
                self.current_item_index = Some(next);
                Some(item.clone())
            }
            None => {
                self.current_item_index = None;
                self.exhausted = true;
                None
            }
        }
    }

    pub fn set_current_index(&mut self, index: usize) -> Result<()> {
        if index >= self.items.len() {
            return Err(ControlError::IndexOutOfRange {
                index,
                len: self.items.len(),
            });
        }
        self.current_item_index = Some(index);
        self.exhausted = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn item(object_id: &str) -> PlaybackItem {
        PlaybackItem::new("f5b1b596-c1d2-11e9-af8b-705681aa5dfd", object_id, format!("Track {object_id}"))
    }

    #[test]
    fn test_walks_items_in_order() {
        let mut queue = PlaybackQueue::new();
        queue.append([item("a"), item("b")]);
        assert!(queue.has_next());

        assert_eq!(queue.next_item().unwrap().object_id, "a");
        assert_eq!(queue.current_item_index(), Some(0));
        assert_eq!(queue.next_item().unwrap().object_id, "b");
        assert_eq!(queue.current_item().unwrap().object_id, "b");

        assert!(!queue.has_next());
        assert!(queue.next_item().is_none());
        assert_eq!(queue.current_item_index(), None);

        // not restartable without new items
        assert!(queue.next_item().is_none());
    }

    #[test]
    fn test_append_after_exhaustion() {
        let mut queue = PlaybackQueue::new();
        queue.append([item("a")]);
        queue.next_item();
        assert!(queue.next_item().is_none());

        queue.append([item("b")]);
        assert_eq!(queue.next_item().unwrap().object_id, "a");
    }

    #[test]
    fn test_set_current_index() {
        let mut queue = PlaybackQueue::new();
        queue.append([item("a"), item("b")]);

        assert!(matches!(
            queue.set_current_index(2),
            Err(ControlError::IndexOutOfRange { index: 2, len: 2 })
        ));
        assert_eq!(queue.current_item_index(), None);

        queue.set_current_index(1).unwrap();
        assert_eq!(queue.current_item().unwrap().object_id, "b");
        assert!(queue.next_item().is_none());
    }

    #[test]
    fn test_clear_and_replace_reset_cursor() {
        let mut queue = PlaybackQueue::new();
        queue.append([item("a"), item("b")]);
        queue.next_item();

        queue.replace([item("c")]);
        assert_eq!(queue.current_item_index(), None);
        assert_eq!(queue.next_item().unwrap().object_id, "c");

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.current_item_index(), None);
        assert!(queue.next_item().is_none());
    }

    #[test]
    fn test_from_object() {
        let object = DidlObject {
            kind: crate::didl::DidlObjectKind::Item,
            id: "64$0$1".to_string(),
            parent_id: "64$0".to_string(),
            class: "object.item.audioItem.musicTrack".to_string(),
            title: "Blue in Green".to_string(),
            artist: Some("Miles Davis".to_string()),
            album: Some("Kind of Blue".to_string()),
            album_art_uri: Some("http://192.168.99.2:9200/art/64.jpg".to_string()),
            resources: Vec::new(),
        };

        let item = PlaybackItem::from_object("f5b1b596-c1d2-11e9-af8b-705681aa5dfd", &object);
        assert_eq!(item.object_id, "64$0$1");
        assert_eq!(item.image.as_deref(), Some("http://192.168.99.2:9200/art/64.jpg"));
    }

    proptest! {
        #[test]
        fn prop_next_item_exhausts_in_order(ids in proptest::collection::vec("[a-z0-9]{1,8}", 0..16)) {
            let mut queue = PlaybackQueue::new();
            queue.append(ids.iter().map(|id| item(id)));

            for id in &ids {
                let next = queue.next_item();
                prop_assert_eq!(next.map(|i| i.object_id), Some(id.clone()));
            }
            prop_assert!(queue.next_item().is_none());
            prop_assert_eq!(queue.current_item_index(), None);
        }

        #[test]
        fn prop_cursor_is_unset_or_valid(
            ops in proptest::collection::vec(0u8..5, 0..40),
            index in 0usize..6,
        ) {
            let mut queue = PlaybackQueue::new();
            for op in ops {
                match op {
                    0 => queue.append([item("x")]),
                    1 => { queue.next_item(); }
                    2 => { let _ = queue.set_current_index(index); }
                    3 => queue.clear(),
                    _ => queue.replace([item("y"), item("z")]),
                }
                if let Some(current) = queue.current_item_index() {
                    prop_assert!(current < queue.len());
                }
            }
        }
    }
}
