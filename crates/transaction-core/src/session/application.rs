//! Application sessions
//!
//! An application session groups the dialogs and attributes an application
//! keeps for one call. It lives in the call session and is only reachable
//! through the [`SessionContext`](super::SessionContext).

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use tokio::time::Instant;
use uuid::Uuid;

use crate::dialog::{Dialog, DialogId};
use crate::error::{Error, Result};

pub struct ApplicationSession {
    id: String,
    created: Instant,
    attributes: HashMap<String, Box<dyn Any + Send>>,
    dialogs: HashMap<DialogId, Dialog>,
}

impl ApplicationSession {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created: Instant::now(),
            attributes: HashMap::new(),
            dialogs: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    /// Store an attribute, returning true if one was replaced
    pub fn set_attribute<T: Any + Send>(&mut self, name: impl Into<String>, value: T) -> bool {
        self.attributes.insert(name.into(), Box::new(value)).is_some()
    }

    /// Typed attribute access; `None` if missing or of another type
    pub fn attribute<T: Any>(&self, name: &str) -> Option<&T> {
        self.attributes.get(name).and_then(|value| value.downcast_ref())
    }

    pub fn attribute_mut<T: Any>(&mut self, name: &str) -> Option<&mut T> {
        self.attributes.get_mut(name).and_then(|value| value.downcast_mut())
    }

    pub fn remove_attribute(&mut self, name: &str) -> bool {
        self.attributes.remove(name).is_some()
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// Attach a dialog. A dialog with the same id is an illegal state.
    pub fn add_dialog(&mut self, dialog: Dialog) -> Result<()> {
        if self.dialogs.contains_key(dialog.id()) {
            return Err(Error::illegal_state(format!(
                "Dialog {} already in application session {}",
                dialog.id(),
                self.id
            )));
        }
        self.dialogs.insert(dialog.id().clone(), dialog);
        Ok(())
    }

    pub fn dialog(&self, id: &DialogId) -> Option<&Dialog> {
        self.dialogs.get(id)
    }

    pub fn dialog_mut(&mut self, id: &DialogId) -> Option<&mut Dialog> {
        self.dialogs.get_mut(id)
    }

    pub fn remove_dialog(&mut self, id: &DialogId) -> Option<Dialog> {
        self.dialogs.remove(id)
    }

    pub fn dialogs(&self) -> impl Iterator<Item = &Dialog> {
        self.dialogs.values()
    }
}

impl Default for ApplicationSession {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ApplicationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationSession")
            .field("id", &self.id)
            .field("attributes", &self.attributes.len())
            .field("dialogs", &self.dialogs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use siplet_sip_core::{CSeq, HeaderAccess, HeaderName, HeaderValue, Method, Request, StatusCode};

    use super::*;

    fn dialog() -> Dialog {
        let mut invite = Request::new(Method::Invite, "sip:bob@example.com".parse().unwrap());
        invite
            .set_dialog_headers(
                "<sip:alice@example.com>;tag=a".parse().unwrap(),
                "<sip:bob@example.com>".parse().unwrap(),
                "app@example.com",
                CSeq::new(1, Method::Invite),
            )
            .unwrap();
        let mut ok = invite.create_response(StatusCode::OK, None).unwrap();
        ok.set_to_tag("b").unwrap();
        let contact = "<sip:bob@192.0.2.1>".parse().unwrap();
        ok.add_header(HeaderName::Contact, HeaderValue::Address(contact)).unwrap();
        Dialog::new_uac(&invite, &ok).unwrap()
    }

    #[test]
    fn test_typed_attributes() {
        let mut session = ApplicationSession::new();
        assert!(!session.set_attribute("count", 1u32));
        assert!(session.set_attribute("count", 2u32));
        assert_eq!(session.attribute::<u32>("count"), Some(&2));
        assert_eq!(session.attribute::<String>("count"), None);
        *session.attribute_mut::<u32>("count").unwrap() += 1;
        assert_eq!(session.attribute::<u32>("count"), Some(&3));
        assert!(session.remove_attribute("count"));
        assert_eq!(session.attribute_names().count(), 0);
    }

    #[test]
    fn test_duplicate_dialog_is_illegal() {
        let mut session = ApplicationSession::with_id("app-1");
        session.add_dialog(dialog()).unwrap();
        assert!(matches!(session.add_dialog(dialog()), Err(Error::IllegalState(_))));
        assert_eq!(session.dialogs().count(), 1);
    }
}
