//! Dispatcher commands
//!
//! Commands and replies for the actor pattern. A command is built by the
//! `DocStore` handle and moved into the queue; from then on only the
//! dispatcher touches it.

use std::fmt;

use mongodb::bson::Document;
use tokio::sync::oneshot;

use crate::error::StoreResult;
use crate::stream::ResultStream;

/// Target of a command: database and collection names
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub db: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.collection)
    }
}

/// Signal fired once a mutating command has been applied
pub type Completion = oneshot::Sender<()>;

/// Reply channel of a find command
pub type FindReply = oneshot::Sender<StoreResult<ResultStream>>;

/// Commands sent to the dispatcher
#[derive(Debug)]
pub enum Command {
    Insert {
        ns: Namespace,
        doc: Document,
        done: Option<Completion>,
    },
    Upsert {
        ns: Namespace,
        query: Document,
        doc: Document,
        done: Option<Completion>,
    },
    Remove {
        ns: Namespace,
        query: Document,
        done: Option<Completion>,
    },
    Find {
        ns: Namespace,
        query: Document,
        reply: FindReply,
    },
}

impl Command {
    /// Short name of the operation, used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Insert { .. } => "insert",
            Command::Upsert { .. } => "upsert",
            Command::Remove { .. } => "remove",
            Command::Find { .. } => "find",
        }
    }

    pub fn namespace(&self) -> &Namespace {
        match self {
            Command::Insert { ns, .. }
            | Command::Upsert { ns, .. }
            | Command::Remove { ns, .. }
            | Command::Find { ns, .. } => ns,
        }
    }

    /// Whether the command changes stored data (and is therefore retried on failure)
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Command::Find { .. })
    }

    /// Fire the completion signal of an applied mutating command
    pub(crate) fn complete(self) {
        let done = match self {
            Command::Insert { done, .. } | Command::Upsert { done, .. } | Command::Remove { done, .. } => done,
            Command::Find { .. } => None,
        };
        if let Some(done) = done {
            // The caller may have stopped waiting; the write is applied either way
            let _ = done.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn test_namespace_display() {
        let ns = Namespace::new("shop", "orders");
        assert_eq!(ns.to_string(), "shop.orders");
    }

    #[test]
    fn test_command_kind_and_mutating() {
        let insert = Command::Insert {
            ns: Namespace::new("shop", "orders"),
            doc: doc! { "amount": 10 },
            done: None,
        };
        assert_eq!(insert.kind(), "insert");
        assert!(insert.is_mutating());

        let (reply, _rx) = oneshot::channel();
        let find = Command::Find {
            ns: Namespace::new("shop", "orders"),
            query: doc! {},
            reply,
        };
        assert_eq!(find.kind(), "find");
        assert!(!find.is_mutating());
        assert_eq!(find.namespace().collection, "orders");
    }
}
