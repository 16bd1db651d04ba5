//! Operation catalogue.
//!
//! Every operation the server exposes has exactly one row here: its wire
//! name (which is also its route), the request schema, the response schema
//! if it returns a payload, and the ordered argument names handed to the
//! backend. Adding an operation means adding a row and an [`FsOps`] method.
//!
//! [`FsOps`]: crate::ops::FsOps

use strum::{Display, EnumCount, EnumIter, EnumString, IntoStaticStr};

use crate::schema::*;

/// Static description of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationDescriptor {
    pub operation: Operation,
    /// Wire name, also the last route segment.
    pub name: &'static str,
    /// HTTP route (`/<name>`).
    pub route: &'static str,
    pub request_schema: &'static str,
    /// `None` for operations that succeed with a null `data`.
    pub response_schema: Option<&'static str>,
    /// Backend arguments in call order.
    pub args: &'static [&'static str],
    /// Arguments that are virtual paths and must be sandboxed.
    pub path_args: &'static [&'static str],
}

/// Callback for code that is generic over the request type.
///
/// [`Operation::visit`] calls `visit::<R>()` with the request type bound to
/// the operation, so a dispatcher can decode, invoke and encode without a
/// hand-written match per operation.
pub trait RequestVisitor {
    type Output;

    fn visit<R: Request>(self) -> Self::Output;
}

macro_rules! catalogue {
    (@response none) => { None };
    (@response $resp:ident) => { Some(stringify!($resp)) };

    ($(
        $variant:ident = $name:literal => $req:ident -> $resp:ident,
            args: [$($arg:literal),*],
            paths: [$($path:literal),*];
    )*) => {
        /// An operation the server exposes.
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr,
            EnumIter, EnumCount,
        )]
        pub enum Operation {
            $(
                #[strum(serialize = $name)]
                $variant,
            )*
        }

        /// The full catalogue, indexed by `Operation as usize`.
        pub static CATALOGUE: [OperationDescriptor; Operation::COUNT] = [
            $(
                OperationDescriptor {
                    operation: Operation::$variant,
                    name: $name,
                    route: concat!("/", $name),
                    request_schema: stringify!($req),
                    response_schema: catalogue!(@response $resp),
                    args: &[$($arg),*],
                    path_args: &[$($path),*],
                },
            )*
        ];

        impl Operation {
            /// Call `visitor` with the request type of this operation.
            pub fn visit<V: RequestVisitor>(self, visitor: V) -> V::Output {
                match self {
                    $( Operation::$variant => visitor.visit::<$req>(), )*
                }
            }
        }
    };
}

catalogue! {
    Access = "access" => AccessRequest -> none,
        args: ["path", "mode"], paths: ["path"];
    Chmod = "chmod" => ChmodRequest -> none,
        args: ["path", "mode"], paths: ["path"];
    Chown = "chown" => ChownRequest -> none,
        args: ["path", "uid", "gid"], paths: ["path"];
    Getattr = "getattr" => GetattrRequest -> FileStat,
        args: ["path", "fh"], paths: ["path"];
    Readdir = "readdir" => ReaddirRequest -> ReaddirOutput,
        args: ["path", "fh"], paths: ["path"];
    Readlink = "readlink" => ReadlinkRequest -> ReadlinkOutput,
        args: ["path"], paths: ["path"];
    Mknod = "mknod" => MknodRequest -> none,
        args: ["path", "mode", "dev"], paths: ["path"];
    Rmdir = "rmdir" => RmdirRequest -> none,
        args: ["path"], paths: ["path"];
    Mkdir = "mkdir" => MkdirRequest -> none,
        args: ["path", "mode"], paths: ["path"];
    Statfs = "statfs" => StatfsRequest -> StatVfs,
        args: ["path"], paths: ["path"];
    Unlink = "unlink" => UnlinkRequest -> none,
        args: ["path"], paths: ["path"];
    Symlink = "symlink" => SymlinkRequest -> none,
        args: ["name", "target"], paths: ["name"];
    Rename = "rename" => RenameRequest -> none,
        args: ["old", "new"], paths: ["old", "new"];
    Link = "link" => LinkRequest -> none,
        args: ["target", "name"], paths: ["target", "name"];
    Utimens = "utimens" => UtimensRequest -> none,
        args: ["path", "times"], paths: ["path"];
    Open = "open" => OpenRequest -> HandleOutput,
        args: ["path", "flags"], paths: ["path"];
    Create = "create" => CreateRequest -> HandleOutput,
        args: ["path", "mode"], paths: ["path"];
    Read = "read" => ReadRequest -> ReadOutput,
        args: ["path", "size", "offset", "fh"], paths: ["path"];
    Write = "write" => WriteRequest -> WriteOutput,
        args: ["path", "data", "offset", "fh"], paths: ["path"];
    Truncate = "truncate" => TruncateRequest -> none,
        args: ["path", "length", "fh"], paths: ["path"];
    Flush = "flush" => FlushRequest -> none,
        args: ["path", "fh"], paths: ["path"];
    Release = "release" => ReleaseRequest -> none,
        args: ["path", "fh"], paths: ["path"];
    Fsync = "fsync" => FsyncRequest -> none,
        args: ["path", "datasync", "fh"], paths: ["path"];
}

impl Operation {
    /// Look up an operation by wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    /// Catalogue entry for this operation.
    pub fn descriptor(self) -> &'static OperationDescriptor {
        &CATALOGUE[self as usize]
    }

    /// Wire name.
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// Look up a descriptor by wire name.
pub fn lookup(name: &str) -> Option<&'static OperationDescriptor> {
    Operation::from_name(name).map(Operation::descriptor)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::Value;
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_catalogue_has_every_operation_once() {
        assert_eq!(CATALOGUE.len(), 23);
        let names: HashSet<_> = CATALOGUE.iter().map(|d| d.name).collect();
        assert_eq!(names.len(), CATALOGUE.len());
        for op in Operation::iter() {
            assert_eq!(op.descriptor().operation, op);
            assert_eq!(op.descriptor().name, op.name());
        }
    }

    #[test]
    fn test_lookup() {
        let desc = lookup("getattr").unwrap();
        assert_eq!(desc.route, "/getattr");
        assert_eq!(desc.request_schema, "GetattrRequest");
        assert_eq!(desc.response_schema, Some("FileStat"));
        assert_eq!(lookup("unlink").unwrap().response_schema, None);
        assert!(lookup("frobnicate").is_none());
        assert!(lookup("").is_none());
    }

    #[test]
    fn test_path_args_are_args() {
        for desc in &CATALOGUE {
            for path in desc.path_args {
                assert!(desc.args.contains(path), "{}: {path}", desc.name);
            }
        }
    }

    /// Checks that the request type bound to each operation agrees with the
    /// catalogue row and that its schema carries every declared argument.
    struct SchemaCheck(&'static OperationDescriptor);

    impl RequestVisitor for SchemaCheck {
        type Output = ();

        fn visit<R: Request>(self) -> Self::Output {
            assert_eq!(R::OPERATION, self.0.operation);
            let full = sample_body(self.0);
            let req: R = serde_json::from_value(full.clone())
                .unwrap_or_else(|e| panic!("{}: {e}", self.0.name));
            let back = serde_json::to_value(&req).unwrap();
            for arg in self.0.args {
                assert!(back.get(arg).is_some(), "{} lacks {arg}", self.0.name);
            }
        }
    }

    fn sample_body(desc: &OperationDescriptor) -> Value {
        let mut body = serde_json::Map::new();
        for arg in desc.args {
            let value = match *arg {
                "path" | "name" | "target" | "old" | "new" => Value::from("/x"),
                "data" => Value::from("aGk="),
                "times" => serde_json::json!([1.0, 2.0]),
                _ => Value::from(1),
            };
            body.insert((*arg).to_string(), value);
        }
        Value::Object(body)
    }

    #[test]
    fn test_every_arg_exists_in_request_schema() {
        for desc in &CATALOGUE {
            desc.operation.visit(SchemaCheck(desc));
        }
    }
}
