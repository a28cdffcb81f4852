use std::process::Command;

fn run_with(fixture: &str, envs: &[(&str, &str)]) -> (String, String, bool) {
    let path = format!("tests/fixtures/{fixture}");
    let output = Command::new(env!("CARGO_BIN_EXE_wallet-ledger"))
        .arg(&path)
        .env("RUST_LOG", "warn")
        .envs(envs.iter().copied())
        .output()
        .expect("failed to run binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn run(fixture: &str) -> (String, String, bool) {
    run_with(fixture, &[])
}

const HEADER: &str = "wallet,customer,currency,credit_balance,balance,status";

#[test]
fn valid_operations() {
    let (stdout, stderr, success) = run("valid.csv");

    assert!(success);
    assert!(stderr.is_empty());

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec![
            HEADER,
            "w1,cust_1,usd,50,100,active",
            "w2,cust_2,eur,60,60,active",
            "w3,cust_2,usd,0,0,closed",
        ]
    );
}

#[test]
fn small_page_size_gives_same_result() {
    let (stdout, _, success) =
        run_with("valid.csv", &[("WALLET_LEDGER_MAX_LOTS_PER_PAGE", "1")]);

    assert!(success);
    assert!(stdout.contains("w2,cust_2,eur,60,60,active"));
}

#[test]
fn errors_warn_but_do_not_block() {
    let (stdout, stderr, success) = run("with_errors.csv");

    assert!(success);
    assert!(stderr.contains("unrecognized operation type"));
    assert!(stderr.contains("missing amount"));

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], HEADER);
    assert_eq!(lines[1], "w1,cust_1,usd,75,75,active");
}

#[test]
fn invalid_config_fails() {
    let (stdout, stderr, success) =
        run_with("valid.csv", &[("WALLET_LEDGER_MAX_LOTS_PER_PAGE", "0")]);

    assert!(!success);
    assert!(stdout.is_empty());
    assert!(stderr.contains("WALLET_LEDGER_MAX_LOTS_PER_PAGE"));
}

#[test]
fn missing_input_fails() {
    let (_, stderr, success) = run("does_not_exist.csv");

    assert!(!success);
    assert!(stderr.contains("failed to open"));
}

#[test]
fn usage_without_arguments() {
    let output = Command::new(env!("CARGO_BIN_EXE_wallet-ledger"))
        .output()
        .expect("failed to run binary");

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("usage"));
}
