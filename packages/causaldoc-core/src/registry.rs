use std::collections::BTreeSet;

use crate::change::{OpContent, Value};
use crate::doc::Document;
use crate::error::{Error, Result};
use crate::ids::{ContainerId, ContainerType};

/// Handle to a text container. Edits go through the owning [`Document`]'s open transaction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TextHandler {
    id: ContainerId,
}

/// Handle to a list container.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ListHandler {
    id: ContainerId,
}

/// Handle to a map container.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MapHandler {
    id: ContainerId,
}

/// A resolved container, tagged by kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Handler {
    Text(TextHandler),
    List(ListHandler),
    Map(MapHandler),
}

impl Handler {
    fn for_id(id: ContainerId) -> Self {
        match id.kind() {
            ContainerType::Text => Handler::Text(TextHandler { id }),
            ContainerType::List => Handler::List(ListHandler { id }),
            ContainerType::Map => Handler::Map(MapHandler { id }),
        }
    }

    pub fn id(&self) -> &ContainerId {
        match self {
            Handler::Text(h) => &h.id,
            Handler::List(h) => &h.id,
            Handler::Map(h) => &h.id,
        }
    }

    pub fn kind(&self) -> ContainerType {
        self.id().kind()
    }

    pub fn into_text(self) -> Result<TextHandler> {
        match self {
            Handler::Text(h) => Ok(h),
            other => Err(kind_mismatch(other.id(), ContainerType::Text)),
        }
    }

    pub fn into_list(self) -> Result<ListHandler> {
        match self {
            Handler::List(h) => Ok(h),
            other => Err(kind_mismatch(other.id(), ContainerType::List)),
        }
    }

    pub fn into_map(self) -> Result<MapHandler> {
        match self {
            Handler::Map(h) => Ok(h),
            other => Err(kind_mismatch(other.id(), ContainerType::Map)),
        }
    }
}

/// Narrow a caller-supplied position or length to the `u32` ops carry.
fn narrow(n: usize, what: &str) -> Result<u32> {
    u32::try_from(n).map_err(|_| Error::InvalidState(format!("{what} {n} does not fit in u32")))
}

fn kind_mismatch(id: &ContainerId, wanted: ContainerType) -> Error {
    Error::InvalidState(format!("container {id} is a {}, not a {wanted}", id.kind()))
}

/// Record the creation of a child container under `parent`.
fn create_child(doc: &mut Document, parent: &ContainerId, kind: ContainerType) -> Result<Handler> {
    let id = doc.push_op(parent, OpContent::CreateContainer { kind })?;
    Ok(Handler::for_id(ContainerId::normal(id, kind)))
}

impl TextHandler {
    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Insert `text` at char position `pos`. Inserting an empty string records nothing.
    pub fn insert(&self, doc: &mut Document, pos: usize, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        doc.push_op(
            &self.id,
            OpContent::InsertText {
                pos: narrow(pos, "position")?,
                text: text.to_string(),
            },
        )
        .map(|_| ())
    }

    pub fn delete(&self, doc: &mut Document, pos: usize, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        doc.push_op(
            &self.id,
            OpContent::Delete {
                pos: narrow(pos, "position")?,
                len: narrow(len, "length")?,
            },
        )
        .map(|_| ())
    }
}

impl ListHandler {
    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    pub fn insert(&self, doc: &mut Document, pos: usize, value: impl Into<Value>) -> Result<()> {
        doc.push_op(
            &self.id,
            OpContent::InsertValues {
                pos: narrow(pos, "position")?,
                values: vec![value.into()],
            },
        )
        .map(|_| ())
    }

    pub fn delete(&self, doc: &mut Document, pos: usize, len: usize) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        doc.push_op(
            &self.id,
            OpContent::Delete {
                pos: narrow(pos, "position")?,
                len: narrow(len, "length")?,
            },
        )
        .map(|_| ())
    }

    /// Create a child container and insert a reference to it at `pos`.
    pub fn insert_container(
        &self,
        doc: &mut Document,
        pos: usize,
        kind: ContainerType,
    ) -> Result<Handler> {
        let child = create_child(doc, &self.id, kind)?;
        self.insert(doc, pos, Value::Container(child.id().clone()))?;
        Ok(child)
    }
}

impl MapHandler {
    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    pub fn insert(&self, doc: &mut Document, key: &str, value: impl Into<Value>) -> Result<()> {
        doc.push_op(
            &self.id,
            OpContent::SetKey {
                key: key.to_string(),
                value: Some(value.into()),
            },
        )
        .map(|_| ())
    }

    pub fn delete(&self, doc: &mut Document, key: &str) -> Result<()> {
        doc.push_op(
            &self.id,
            OpContent::SetKey {
                key: key.to_string(),
                value: None,
            },
        )
        .map(|_| ())
    }

    /// Create a child container and store a reference to it under `key`.
    pub fn insert_container(
        &self,
        doc: &mut Document,
        key: &str,
        kind: ContainerType,
    ) -> Result<Handler> {
        let child = create_child(doc, &self.id, kind)?;
        self.insert(doc, key, Value::Container(child.id().clone()))?;
        Ok(child)
    }
}

/// Every container this document knows about, resolved to typed handlers.
#[derive(Clone, Debug, Default)]
pub struct ContainerRegistry {
    known: BTreeSet<ContainerId>,
}

impl ContainerRegistry {
    pub fn register(&mut self, id: ContainerId) -> Handler {
        self.known.insert(id.clone());
        Handler::for_id(id)
    }

    pub(crate) fn root_text(&mut self, name: &str) -> TextHandler {
        let id = ContainerId::root(name, ContainerType::Text);
        self.known.insert(id.clone());
        TextHandler { id }
    }

    pub(crate) fn root_list(&mut self, name: &str) -> ListHandler {
        let id = ContainerId::root(name, ContainerType::List);
        self.known.insert(id.clone());
        ListHandler { id }
    }

    pub(crate) fn root_map(&mut self, name: &str) -> MapHandler {
        let id = ContainerId::root(name, ContainerType::Map);
        self.known.insert(id.clone());
        MapHandler { id }
    }

    pub fn contains(&self, id: &ContainerId) -> bool {
        self.known.contains(id)
    }

    pub fn get(&self, id: &ContainerId) -> Result<Handler> {
        if self.contains(id) {
            Ok(Handler::for_id(id.clone()))
        } else {
            Err(Error::NotFound(format!("container {id}")))
        }
    }

    /// Resolve a container by its string form: `<counter>:<Type>@<peer>` or a root name.
    pub fn resolve(&self, id: &str) -> Result<Handler> {
        if let Ok(normal) = ContainerId::parse_normal(id) {
            return self.get(&normal);
        }
        let mut roots = self
            .known
            .iter()
            .filter(|c| matches!(c, ContainerId::Root { name, .. } if name == id));
        match (roots.next(), roots.next()) {
            (Some(root), None) => Ok(Handler::for_id(root.clone())),
            (Some(_), Some(_)) => Err(Error::InvalidState(format!(
                "root name {id:?} is used by several container kinds"
            ))),
            (None, _) => Err(Error::NotFound(format!("container {id}"))),
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &ContainerId> + '_ {
        self.known.iter()
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}
