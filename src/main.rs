use agent_desk::AgentDesk;
use agent_desk::config::DeskConfig;
use agent_desk::model::Pagination;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = DeskConfig::from_env()?;
    eprintln!("Agent Desk v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Service: {}", config.api_base_url);

    let desk = AgentDesk::new(config)?;

    let health = match desk.health().await {
        Ok(health) => health,
        Err(e) => {
            eprintln!("Error: {}", e.user_message());
            if let Some(hint) = e.action_hint() {
                eprintln!("  {hint}");
            }
            std::process::exit(1);
        }
    };
    eprintln!(
        "   Health: {} ({} {})\n",
        health.status, health.service, health.version
    );

    let page = Pagination::default();
    let listing = desk.agents(page).await?;
    let agents = desk.agent_details(page).await?;
    println!("{} agent(s), showing {}", listing.total, agents.len());
    for agent in &agents {
        println!(
            "  {}  {:<32} {:>3} document(s)  updated {}",
            agent.id,
            agent.name,
            agent.documents_count,
            agent.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
    if listing.has_more {
        let next = listing.next_skip.unwrap_or(page.skip + page.limit);
        println!("  … more agents after skip={next}");
    }

    desk.shutdown().await;
    Ok(())
}
