//! Switchboard command-line interface.

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use switchboard::config::{Config, default_config_path};
use switchboard::llm::{
    CompletionInvoker, CompletionOptions, CompletionRequest, Conversation, CredentialStatus,
    EnvSecrets, LLMError, ProviderRegistry,
};
use switchboard::tokens::{TokenEstimator, TokenizerId};

#[derive(Debug, Parser)]
#[command(
    name = "switchboard",
    version,
    about = "Talk to many LLM providers through one interface"
)]
struct Cli {
    /// Path to the YAML config file.
    #[arg(long, global = true, default_value_os_t = default_config_path())]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List registered providers and whether their credentials are set.
    Providers,
    /// Send one prompt to one provider.
    Complete {
        #[arg(long, short)]
        provider: String,
        /// Defaults to the provider's configured model.
        #[arg(long, short)]
        model: Option<String>,
        /// System prompt.
        #[arg(long, short)]
        system: Option<String>,
        #[arg(long)]
        max_tokens: Option<NonZeroU32>,
        /// Overrides the configured request timeout.
        #[arg(long)]
        timeout: Option<u64>,
        /// Print a token estimate and compare it with reported usage.
        #[arg(long)]
        estimate: bool,
        prompt: String,
    },
    /// Send the same prompt to several providers at once.
    Compare {
        /// Providers to ask; defaults to every provider with a default model.
        #[arg(long = "provider", short)]
        providers: Vec<String>,
        prompt: String,
    },
    /// Count the tokens in a piece of text.
    Tokens {
        #[arg(long, short, conflicts_with = "model")]
        tokenizer: Option<String>,
        /// Pick the tokenizer for this model.
        #[arg(long, short)]
        model: Option<String>,
        /// Print each token.
        #[arg(long)]
        show: bool,
        text: String,
    },
}

fn main() -> anyhow::Result<()> {
    // Values from .env win over the inherited environment.
    let dotenv = dotenvy::dotenv_override();
    init_tracing();
    match dotenv {
        Ok(path) => debug!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(error = %e, "Failed to load .env"),
    }

    let cli = Cli::parse();
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?
        .block_on(run(cli))
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("switchboard=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(&cli.config)
        .await
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let registry = ProviderRegistry::from_config(&config, Arc::new(EnvSecrets));
    info!(providers = registry.len(), "Provider registry ready");

    let mut invoker = CompletionInvoker::new(registry.clone());
    if let Some(timeout) = config.request_timeout() {
        invoker = invoker.with_timeout(timeout);
    }

    match cli.command {
        Command::Providers => list_providers(&registry),
        Command::Complete {
            provider,
            model,
            system,
            max_tokens,
            timeout,
            estimate,
            prompt,
        } => {
            let model = model_for(&registry, &provider, model)?;
            let mut request = CompletionRequest::new(
                provider,
                model,
                Conversation::prompt(system.as_deref(), prompt),
            );
            request.max_output_tokens = max_tokens;
            let options = CompletionOptions {
                timeout: timeout.map(Duration::from_secs),
                cancel: None,
            };
            complete(&invoker, &request, &options, estimate.then(TokenEstimator::new)).await
        }
        Command::Compare { providers, prompt } => compare(&invoker, providers, &prompt).await,
        Command::Tokens {
            tokenizer,
            model,
            show,
            text,
        } => {
            let tokenizer = match (tokenizer, model) {
                (Some(id), _) => id,
                (None, Some(model)) => TokenizerId::for_model(&model).to_string(),
                (None, None) => config.default_tokenizer.clone(),
            };
            count_tokens(&tokenizer, &text, show)
        }
    }
}

fn model_for(
    registry: &ProviderRegistry,
    provider: &str,
    model: Option<String>,
) -> anyhow::Result<String> {
    if let Some(model) = model {
        return Ok(model);
    }
    let Some(config) = registry.get(provider) else {
        bail!(LLMError::UnknownProvider {
            name: provider.to_string()
        });
    };
    config
        .default_model
        .clone()
        .with_context(|| format!("provider '{provider}' has no default model; pass --model"))
}

fn list_providers(registry: &ProviderRegistry) -> anyhow::Result<()> {
    println!(
        "{:<18} {:<28} {:<20} {:<18} BASE URL",
        "NAME", "AUTH", "API", "CREDENTIAL"
    );
    for name in registry.names() {
        let Some(config) = registry.get(&name) else {
            continue;
        };
        let credential = match registry.credential_status(&name) {
            Some(CredentialStatus::Present) => registry
                .credential(&name)
                .map(|secret| mask_secret(&secret))
                .unwrap_or_default(),
            Some(CredentialStatus::Missing) => {
                format!("missing ({})", config.credential_env.as_deref().unwrap_or("-"))
            }
            Some(CredentialStatus::NotRequired) | None => "not required".to_string(),
        };
        println!(
            "{:<18} {:<28} {:<20} {:<18} {}",
            name, config.auth, config.api, credential, config.base_url
        );
    }
    Ok(())
}

async fn complete(
    invoker: &CompletionInvoker,
    request: &CompletionRequest,
    options: &CompletionOptions,
    estimator: Option<TokenEstimator>,
) -> anyhow::Result<()> {
    let tokenizer = TokenizerId::for_model(&request.model);
    let estimate = estimator
        .as_ref()
        .map(|e| e.estimate_conversation(&request.conversation, tokenizer.as_str()))
        .transpose()?;
    if let Some(estimate) = estimate {
        println!("Input tokens (estimated, {tokenizer}): {}", estimate.count);
    }

    let result = invoker.complete_with(request, options).await?;
    println!("{}", result.text);

    if let Some(estimator) = estimator {
        let output = estimator.estimate(&result.text, tokenizer.as_str())?;
        println!("\nOutput tokens (estimated, {tokenizer}): {}", output.count);
        match result.usage {
            Some(usage) => {
                println!("Exact token usage from API:");
                println!("  Prompt tokens: {}", usage.prompt_tokens);
                println!("  Completion tokens: {}", usage.completion_tokens);
                println!("  Total tokens: {}", usage.total_tokens);
                if let Some(estimate) = estimate {
                    println!("  Prompt drift: {:+}", estimate.drift(usage.prompt_tokens));
                }
            }
            None => println!("Backend reported no usage"),
        }
    }
    Ok(())
}

async fn compare(
    invoker: &CompletionInvoker,
    providers: Vec<String>,
    prompt: &str,
) -> anyhow::Result<()> {
    let registry = invoker.registry();
    let providers = if providers.is_empty() {
        registry
            .names()
            .into_iter()
            .filter(|name| registry.get(name).is_some_and(|c| c.default_model.is_some()))
            .collect()
    } else {
        providers
    };

    let mut requests = Vec::new();
    for provider in providers {
        if registry.credential_status(&provider) == Some(CredentialStatus::Missing) {
            println!("Skipping {provider}: credential not set");
            continue;
        }
        let model = match model_for(registry, &provider, None) {
            Ok(model) => model,
            Err(e) => {
                println!("Skipping {provider}: {e}");
                continue;
            }
        };
        requests.push(CompletionRequest::new(
            provider,
            model,
            Conversation::prompt(None, prompt),
        ));
    }
    if requests.is_empty() {
        bail!("no providers available; set at least one API key");
    }

    let results = join_all(requests.iter().map(|request| invoker.complete(request))).await;

    let rule = "=".repeat(80);
    let mut failures = 0;
    for (request, result) in requests.iter().zip(results) {
        println!("\n{rule}\n{} ({})\n{rule}", request.provider, request.model);
        match result {
            Ok(result) => println!("{}", result.text),
            Err(e) => {
                failures += 1;
                println!("error: {e}");
            }
        }
    }
    if failures == requests.len() {
        bail!("every provider failed");
    }
    Ok(())
}

fn count_tokens(tokenizer: &str, text: &str, show: bool) -> anyhow::Result<()> {
    let estimator = TokenEstimator::new();
    let estimate = estimator.estimate(text, tokenizer)?;
    println!("Number of tokens ({}): {}", estimate.tokenizer, estimate.count);
    if show {
        for (i, piece) in estimator.pieces(text, tokenizer)?.iter().enumerate() {
            println!("Token {i}: {piece:?}");
        }
    }
    Ok(())
}

/// First few characters of a secret, enough to tell keys apart.
fn mask_secret(secret: &str) -> String {
    let shown: String = secret.chars().take(secret.chars().count().min(16) / 4).collect();
    format!("{shown}...")
}
