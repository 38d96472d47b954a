use std::sync::Arc;

use crate::commands::{load_config, migrated_pool, runtime, CommandResult, StepFailure};
use signoff_core::audit::AuditContext;
use signoff_core::domain::chain::{ApprovalChain, ApprovalType};
use signoff_core::domain::document::DocumentType;
use signoff_core::workflow::{ChainDraft, InMemoryRoleDirectory, StepDefinition};
use signoff_engine::{NotificationOutbox, TracingAuditSink, WorkflowApi};

pub const DEMO_CHAIN_NAME: &str = "Two-Step Sign-off";
const SEED_ACTOR: &str = "signoff-cli";

/// The demo chain: the CFO then the CEO, either one approval per step.
pub fn demo_chain_draft() -> ChainDraft {
    ChainDraft {
        chain_name: DEMO_CHAIN_NAME.to_string(),
        document_type: DocumentType::Budget,
        steps: vec![
            StepDefinition::for_email("cfo@x.com", ApprovalType::Any),
            StepDefinition::for_email("ceo@x.com", ApprovalType::Any),
        ],
        is_active: true,
        created_by: SEED_ACTOR.to_string(),
    }
}

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = migrated_pool(&config).await?;
        let api = WorkflowApi::sqlite(
            pool.clone(),
            Arc::new(InMemoryRoleDirectory::with_roles(config.roles.clone())),
            Arc::new(TracingAuditSink),
            NotificationOutbox::disabled(),
        );

        let seeded = seed_demo_chain(&api).await;
        pool.close().await;
        seeded
    });

    match result {
        Ok(SeedOutcome { chain, created }) => CommandResult::success(
            "seed",
            format!(
                "chain `{}` with {} steps for `{}` documents {}",
                chain.chain_name,
                chain.steps.len(),
                chain.document_type,
                if created { "created" } else { "already present" }
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

pub struct SeedOutcome {
    pub chain: ApprovalChain,
    pub created: bool,
}

/// Creates the demo chain unless a chain with the same name already exists.
pub async fn seed_demo_chain(api: &WorkflowApi) -> Result<SeedOutcome, StepFailure> {
    let existing = api
        .list_chains(false)
        .await
        .map_err(|error| ("seed_execution", error.to_string(), 5u8))?
        .into_iter()
        .find(|chain| chain.chain_name == DEMO_CHAIN_NAME);
    if let Some(chain) = existing {
        return Ok(SeedOutcome { chain, created: false });
    }

    let context = AuditContext::new(None, "seed", SEED_ACTOR);
    let chain = api
        .create_chain(demo_chain_draft(), &context)
        .await
        .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
    Ok(SeedOutcome { chain, created: true })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use signoff_core::audit::InMemoryAuditSink;
    use signoff_core::workflow::InMemoryRoleDirectory;
    use signoff_engine::WorkflowApi;

    use super::{seed_demo_chain, DEMO_CHAIN_NAME};

    #[tokio::test]
    async fn seeding_twice_keeps_a_single_demo_chain() {
        let audit = InMemoryAuditSink::default();
        let api = WorkflowApi::in_memory(
            Arc::new(InMemoryRoleDirectory::default()),
            Arc::new(audit.clone()),
        );

        let first = seed_demo_chain(&api).await.expect("first seed");
        assert!(first.created);
        let second = seed_demo_chain(&api).await.expect("second seed");
        assert!(!second.created);
        assert_eq!(first.chain.id, second.chain.id);

        let chains = api.list_chains(false).await.expect("list");
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].chain_name, DEMO_CHAIN_NAME);
        assert_eq!(audit.event_types(), vec!["chain.created".to_string()]);
    }
}
