//! Purpose: Hold top-level CLI command dispatch for `pagesync`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Commands print JSON on stdout; failures surface as `Error` for exit-code mapping.

use super::*;
use clap::CommandFactory;
use pagesync::api::{Continuation, NextPageToken, SyncToken};

pub(super) fn dispatch_command(command: Command) -> Result<(), Error> {
    match command {
        Command::Serve(args) => {
            let config = args.into_config()?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(config))
        }
        Command::Token {
            command: TokenCommand::Decode { token, kind },
        } => {
            let decoded = decode_token(&token, kind)?;
            emit_json(decoded.to_json());
            Ok(())
        }
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "pagesync", &mut io::stdout());
            Ok(())
        }
    }
}

fn decode_token(token: &str, kind: Option<TokenKindArg>) -> Result<Continuation, Error> {
    match kind {
        Some(TokenKindArg::NextPage) => NextPageToken::decode(token).map(Continuation::NextPage),
        Some(TokenKindArg::Sync) => SyncToken::decode(token).map(Continuation::Sync),
        None => Continuation::decode(token),
    }
}
