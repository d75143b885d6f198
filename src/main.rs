use clap::Parser;
use saccade_agent::{AgentConfig, Provider, Session, Status};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "saccade")]
#[command(about = "Vision-driven browser agent — perceive, decide, act, verify")]
#[command(version)]
struct Cli {
    /// Natural-language objective for this run
    objective: Option<String>,

    /// Decision oracle: mock, anthropic, openai
    #[arg(long)]
    provider: Option<Provider>,

    /// Run the browser headless
    #[arg(long)]
    headless: bool,

    /// Step budget (overrides config)
    #[arg(long)]
    max_steps: Option<u32>,

    /// Session identifier — names the checkpoint file
    #[arg(long)]
    session: Option<String>,

    /// Resume the session's checkpointed state
    #[arg(long)]
    resume: bool,

    /// Start URL
    #[arg(long)]
    url: Option<String>,

    /// Verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only warnings)
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        Level::WARN
    } else {
        match cli.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();

    let mut config = AgentConfig::from_env();
    if let Some(provider) = cli.provider {
        config.provider = provider;
        config.api_key = match provider {
            Provider::Anthropic => std::env::var("ANTHROPIC_API_KEY").ok(),
            Provider::OpenAi => std::env::var("OPENAI_API_KEY").ok(),
            Provider::Mock => None,
        };
    }
    if let Some(objective) = cli.objective {
        config.objective = objective;
    }
    if cli.headless {
        config.headless = true;
    }
    if let Some(max_steps) = cli.max_steps {
        config.max_steps = max_steps;
    }
    if let Some(session) = cli.session {
        config.session_id = session;
    }
    if let Some(url) = cli.url {
        config.start_url = url;
    }

    println!("saccade launching (provider: {:?})", config.provider);
    println!("objective: {}", config.objective);

    let stealth = eoka::StealthConfig {
        headless: config.headless,
        viewport_width: config.viewport_width,
        viewport_height: config.viewport_height,
        ..Default::default()
    };
    let browser = eoka::Browser::launch_with_config(stealth).await?;
    let page = browser.new_page("about:blank").await?;

    page.goto(&config.start_url).await?;
    // Best effort — some pages never go fully idle
    let _ = page.wait_for_network_idle(500, 10_000).await;

    let mut session = if cli.resume {
        Session::resume(page, config)?
    } else {
        Session::new(page, config)
    };
    let outcome = session.run().await?;

    println!();
    match outcome.status {
        Status::Done => println!("✓ Objective complete after {} steps", outcome.steps_taken),
        Status::Fail => println!("✗ Run failed after {} steps", outcome.steps_taken),
        other => println!(
            "Stopped ({:?}) after {} steps",
            other, outcome.steps_taken
        ),
    }
    if let Some(reasoning) = outcome.reasoning {
        println!("  last reasoning: {}", reasoning);
    }

    browser.close().await?;
    Ok(())
}
