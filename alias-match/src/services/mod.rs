//! Service layer: resolution pipeline, feedback learning and curation

pub mod feedback;
pub mod ingest;
pub mod match_resolver;
pub mod match_session;
pub mod proposal_client;
pub mod provenance_validator;
pub mod registry;
pub mod verification;

pub use feedback::{FeedbackEngine, FeedbackSettings};
pub use match_resolver::{MatchResolver, ResolutionReport, ResolverSettings};
pub use match_session::{MatchSession, SessionOutcome};
pub use proposal_client::{LlmProposalClient, Proposal, ProposalError, ProposalRequest, ProposalService};
pub use provenance_validator::{ProvenanceValidator, Verdict};
pub use registry::Registry;
pub use verification::{build_backend, Evidence, VerificationBackend};
