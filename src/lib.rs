//! A Rust library for reading and writing Virtools composition files
//! (`.nmo`/`.cmo`): a DWORD-granular chunked binary container holding a
//! cross-referenced object graph, schema-versioned per-class payloads, and
//! an identifier-based random-access index.
//!
//! # Quick start
//!
//! ```ignore
//! use nmo::{load_file, Context, ContextOptions, Session};
//! use std::path::Path;
//!
//! let context = Context::new(ContextOptions::default());
//! let mut session = Session::new(&context);
//! load_file(&mut session, Path::new("scene.nmo"), 0)?;
//! println!("{} objects loaded", session.get_object_repository().count());
//! # Ok::<(), nmo::NmoError>(())
//! ```
//!
//! # Layout
//!
//! - [`chunk`]: the DWORD-aligned chunk codec (the atomic serialization unit).
//! - [`header`]: file-level framing (fixed header, Header1 descriptor table).
//! - [`object`], [`repository`]: the in-memory object graph and its indexes.
//! - [`schema`], [`classes`]: the class hierarchy and per-class (de)serializers.
//! - [`remap`]: the file-index/runtime-id translation tables.
//! - [`arena`]: append-only allocation backing interned names and chunk buffers.
//! - [`session`]: `Context`/`Session`, the library's configuration and scope types.
//! - [`load`], [`save`]: the multi-phase load and save pipelines.
//! - [`stream`]: incremental reader/writer for files too large to hold in RAM.

pub mod arena;
pub mod chunk;
pub mod classes;
pub mod error;
pub mod header;
pub mod load;
pub mod log;
pub mod object;
pub mod remap;
pub mod repository;
pub mod save;
pub mod schema;
pub mod session;
pub mod stream;
pub mod types;

pub use error::{NmoError, Result};
pub use load::load_file;
pub use save::save_file;
pub use session::{CancellationToken, Context, ContextOptions, PluginDiagnostic, PluginStatus, Session};
pub use types::{ClassId, Guid, ObjectId};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::ids;
    use crate::object::Object;

    #[test]
    fn context_builds_a_consistent_schema() {
        let ctx = Context::new(ContextOptions::default());
        assert!(ctx.schema().find_by_class_id(ids::CKOBJECT).is_some());
    }

    #[test]
    fn session_round_trips_through_public_api_only() {
        let ctx = Context::new(ContextOptions::default());
        let mut session = Session::new(&ctx);
        let object = Object::new(ObjectId::NONE, ids::CKSCENEOBJECT);
        let (repository, arena) = session.repository_and_arena_mut();
        repository.add(object, arena).unwrap();

        let dir = std::env::temp_dir();
        let path = dir.join(format!("nmo-lib-test-{}.nmo", std::process::id()));
        save_file(&mut session, &path, save::COMPRESS).unwrap();

        let mut reloaded = Session::new(&ctx);
        load_file(&mut reloaded, &path, load::VALIDATE).unwrap();
        assert_eq!(reloaded.get_object_repository().count(), 1);

        let _ = std::fs::remove_file(&path);
    }
}
