//! Docker wrapper: rewrite the command line and hand over to the real CLI.

use dockersource_core::error::Result;
use dockersource_core::WrapperConfig;
use dockersource_runtime::{execute as execute_plan, Orchestrator, PathResolver, SelfLocation};

/// Plan and run one docker invocation. `argv` includes argv[0].
pub async fn execute(argv: &[String], config: &WrapperConfig) -> Result<()> {
    let (argv0, args) = match argv.split_first() {
        Some((argv0, args)) => (argv0.as_str(), args),
        None => ("", &[][..]),
    };

    let own = SelfLocation::detect(argv0, config.search_path.as_deref());
    let mut locator = PathResolver::new(config.search_path.as_deref(), own);
    if config.invoke_docker {
        locator = locator.search_own_dir();
    }

    let plan = Orchestrator::new(config, &locator)
        .plan(args, std::env::vars_os().collect())
        .await?;
    execute_plan(plan).await
}
