use anyhow::Context;
use obs_rec::config::Config;
use obs_rec::utils::AppError;
use std::process::ExitCode;

fn main() -> ExitCode {
    obs_rec::init_tracing();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::from(AppError::from(e).exit_code());
        }
    };

    match start(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            let code = e.downcast_ref::<AppError>().map_or(2, AppError::exit_code);
            ExitCode::from(code)
        }
    }
}

fn start(config: Config) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime.block_on(obs_rec::run(config))?;
    Ok(())
}
