//! Configuration and session scope: `Context` (process-wide, reference
//! counted) and `Session` (one load/save's arena, repository, id remap, and
//! diagnostics buffer).
//!
//! Grounded in the teacher's `DjvuBuilder::with_dpi`/`with_quality` options
//! pattern, generalized per §4.N into an explicit-default options struct
//! plus a reference-counted context that builds the schema registry once.

use crate::arena::Arena;
use crate::classes::{self};
use crate::log::Level;
use crate::remap::IdRemap;
use crate::repository::ObjectRepository;
use crate::schema::SchemaRegistry;
use crate::types::Guid;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-context knobs. Every field has an explicit default; there is no
/// hidden global the crate reaches around the context for.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub logger_level: Level,
    pub thread_pool_size: Option<usize>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        ContextOptions {
            logger_level: Level::INFO,
            thread_pool_size: None,
        }
    }
}

/// The process-wide entry point. Cheap to clone (an `Arc` around the schema
/// registry); every `Session` created from a `Context` shares the same
/// read-only registry.
#[derive(Clone)]
pub struct Context {
    options: ContextOptions,
    schema: Arc<SchemaRegistry>,
}

impl Context {
    /// Builds the schema registry once. Panics only if the statically
    /// registered class hierarchy itself is inconsistent, which would be a
    /// defect in this crate rather than in caller input.
    pub fn new(options: ContextOptions) -> Self {
        let schema = classes::build_registry();
        schema
            .validate()
            .expect("statically registered class hierarchy must be internally consistent");
        Context {
            options,
            schema: Arc::new(schema),
        }
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// An owned, reference-counted handle to the registry, for callers that
    /// need it alongside a mutable borrow of something else on `Session`.
    pub fn schema_handle(&self) -> Arc<SchemaRegistry> {
        self.schema.clone()
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new(ContextOptions::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginStatus {
    Ok,
    Missing,
    VersionTooOld,
}

/// One row of the plugin-dependency report surfaced to callers (§6.4).
#[derive(Debug, Clone)]
pub struct PluginDiagnostic {
    pub required_guid: Guid,
    pub required_version: u32,
    pub category: String,
    pub resolved_name: Option<String>,
    pub resolved_version: Option<u32>,
    pub status: PluginStatus,
}

/// Cooperative cancellation, checked by the pipeline between phases (§5).
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One load/save's scope: an arena, a repository, the id remap built during
/// that operation, and the diagnostics/warnings collected along the way.
pub struct Session {
    context: Context,
    arena: Arena,
    repository: ObjectRepository,
    id_remap: IdRemap,
    plugin_diagnostics: Vec<PluginDiagnostic>,
    warnings: Vec<String>,
    cancellation: CancellationToken,
}

impl Session {
    pub fn new(context: &Context) -> Self {
        Session {
            context: context.clone(),
            arena: Arena::new(),
            repository: ObjectRepository::new(),
            id_remap: IdRemap::new(),
            plugin_diagnostics: Vec::new(),
            warnings: Vec::new(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn get_object_repository(&self) -> &ObjectRepository {
        &self.repository
    }

    pub fn get_object_repository_mut(&mut self) -> &mut ObjectRepository {
        &mut self.repository
    }

    /// Splits the borrow so callers can mutate the repository while still
    /// reading the arena (names are arena-interned, indexes dereference
    /// them), without the double-borrow a pair of separate accessor calls
    /// would hit.
    pub fn repository_and_arena_mut(&mut self) -> (&mut ObjectRepository, &Arena) {
        (&mut self.repository, &self.arena)
    }

    /// The file-index/runtime-id table this session has built so far
    /// (empty before load's phase 12, or before save's step 1).
    pub fn get_object_index(&self) -> &IdRemap {
        &self.id_remap
    }

    pub fn get_object_index_mut(&mut self) -> &mut IdRemap {
        &mut self.id_remap
    }

    pub fn get_plugin_diagnostics(&self) -> &[PluginDiagnostic] {
        &self.plugin_diagnostics
    }

    pub fn record_plugin_diagnostic(&mut self, diagnostic: PluginDiagnostic) {
        self.plugin_diagnostics.push(diagnostic);
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn record_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Discards the repository, arena, remap table, and diagnostics
    /// collected so far, leaving the session ready for another load/save.
    pub fn reset(&mut self) {
        self.repository.clear();
        self.arena.reset();
        self.id_remap = IdRemap::new();
        self.plugin_diagnostics.clear();
        self.warnings.clear();
    }

    /// Builds a fresh, empty session sharing this session's context and
    /// cancellation token, for a pipeline that wants to assemble its result
    /// before publishing it into `self` with [`Session::adopt`]. Sharing the
    /// token (rather than starting a new one) keeps a caller's in-flight
    /// `cancellation_token().cancel()` effective against the scratch work.
    pub(crate) fn scratch(&self) -> Session {
        Session {
            context: self.context.clone(),
            arena: Arena::new(),
            repository: ObjectRepository::new(),
            id_remap: IdRemap::new(),
            plugin_diagnostics: Vec::new(),
            warnings: Vec::new(),
            cancellation: self.cancellation.clone(),
        }
    }

    /// Replaces this session's repository, arena, remap table, and
    /// diagnostics with `other`'s, keeping this session's `context` and
    /// `cancellation` token. Used by a pipeline that builds a result into a
    /// scratch session and only wants to publish it after every fallible
    /// step has succeeded.
    pub(crate) fn adopt(&mut self, other: Session) {
        self.repository = other.repository;
        self.arena = other.arena;
        self.id_remap = other.id_remap;
        self.plugin_diagnostics = other.plugin_diagnostics;
        self.warnings = other.warnings;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_shares_schema_across_sessions() {
        let ctx = Context::new(ContextOptions::default());
        let a = Session::new(&ctx);
        let b = Session::new(&ctx);
        assert_eq!(a.context().schema().find_by_name("CKObject").is_some(), true);
        assert_eq!(b.context().schema().find_by_name("CKObject").is_some(), true);
    }

    #[test]
    fn cancellation_token_is_observable_after_clone() {
        let token = CancellationToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn session_reset_clears_repository_and_diagnostics() {
        let ctx = Context::new(ContextOptions::default());
        let mut session = Session::new(&ctx);
        session.record_warning("test");
        session.reset();
        assert!(session.warnings().is_empty());
        assert_eq!(session.get_object_repository().count(), 0);
    }
}
