use book_reader::prelude::*;

/// Environment variable naming an optional TOML config file.
const CONFIG_ENV: &str = "BOOK_READER_CONFIG";

/// Warn up front about every external tool that is missing.
fn check_tools(tools: &ToolSettings) {
    for (name, config) in tools.iter() {
        if ExternalTool::resolve(name, config).is_ok() {
            info!("'{}' found.", name);
        } else {
            warn!("'{}' not found. Books that need it will not open.", name);
        }
    }
}

fn load_config() -> Result<Config, ConfigError> {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => Config::load(Path::new(&path)),
        None => Ok(Config::default()),
    }
}

async fn run(path: PathBuf, pages: Vec<usize>) -> Result<(), ReaderError> {
    let config = load_config()?;
    check_tools(&config.tools);

    let mut session = BookSession::new(config);
    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!("{:?}", event);
        }
    });

    let page_count = session.open(&path).await?;
    println!("{}: {} pages", path.display(), page_count);

    let pages = if pages.is_empty() { vec![0] } else { pages };
    for index in pages {
        session.goto(index)?;
        match session.wait_current_page().await {
            Ok(page) => println!(
                "page {}: {}x{} {:?}{}",
                index,
                page.width,
                page.height,
                page.format,
                if page.natural_orientation { "" } else { " (rotated)" }
            ),
            Err(e) => println!("page {}: {}", index, e),
        }
    }
    let stats = session.scheduler().stats();
    info!(
        "{} jobs submitted, {} coalesced, {} completed, {} failed, {} cancelled",
        stats.submitted, stats.coalesced, stats.completed, stats.failed, stats.cancelled
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .format_timestamp_secs()
        .init();

    info!("Initialising...");

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next().map(PathBuf::from) else {
        eprintln!("usage: book_reader <path> [page...]");
        std::process::exit(2);
    };
    let pages = match args.map(|a| a.parse()).collect::<Result<Vec<usize>, _>>() {
        Ok(pages) => pages,
        Err(e) => {
            eprintln!("invalid page number: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(path, pages).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
