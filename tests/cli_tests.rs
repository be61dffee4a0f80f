use clap::Parser;
use resource_advisor::cli::{Args, Commands};

#[test]
fn run_subcommand_parses() {
    let args = Args::try_parse_from(["resource-advisor", "run"]).unwrap();
    assert!(matches!(args.command, Commands::Run));
}

#[test]
fn serve_subcommand_parses() {
    let args = Args::try_parse_from(["resource-advisor", "serve"]).unwrap();
    assert!(matches!(args.command, Commands::Serve));
}

#[test]
fn missing_subcommand_is_an_error() {
    assert!(Args::try_parse_from(["resource-advisor"]).is_err());
}

#[test]
fn unknown_flag_is_rejected() {
    assert!(Args::try_parse_from(["resource-advisor", "run", "--namespace", "default"]).is_err());
}
