//! pos-monitor: arm one payment and wait for it
//!
//! ```text
//! pos-monitor --env dev --chain 1 --to 0x742d...f44e --amount 1000000000000000000
//! pos-monitor --chain 1 --to 0x742d...f44e --token 0xA0b8...eB48 --symbol USDC \
//!             --decimals 6 --amount 1000000 --usd 1.00
//! ```
//!
//! Exits 0 once the payment is confirmed, 1 on a start failure, 130 on Ctrl-C.

use std::str::FromStr;

use num_bigint::BigUint;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use pos_payment_monitor::config::AppConfig;
use pos_payment_monitor::monitor::{
    ChainRegistry, NATIVE_TOKEN_ADDRESS, PaymentCallbacks, PaymentMonitor, PaymentRequest,
};

// ============================================================
// ARGUMENTS
// ============================================================

fn get_arg(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if names.contains(&args[i].as_str()) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn get_env() -> String {
    get_arg(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

fn fail(message: &str) -> ! {
    eprintln!("pos-monitor: {}", message);
    std::process::exit(1);
}

fn parse_arg<T: FromStr>(names: &[&str], what: &str) -> Option<T> {
    get_arg(names).map(|raw| {
        raw.parse()
            .unwrap_or_else(|_| fail(&format!("invalid {}: {}", what, raw)))
    })
}

// ============================================================
// MAIN
// ============================================================

fn main() {
    let env = get_env();
    let app_config = AppConfig::load(&env)
        .unwrap_or_else(|e| fail(&format!("failed to load config/{}.yaml: {}", env, e)));
    let log_guard = pos_payment_monitor::logging::init_logging(&app_config.log);

    tracing::info!("Starting pos-monitor in {} mode", env);

    let chain_id: u64 = parse_arg(&["--chain"], "chain id").unwrap_or(1);
    let recipient = get_arg(&["--to"]).unwrap_or_else(|| fail("--to <recipient> is required"));
    let amount: BigUint = parse_arg(&["--amount"], "amount")
        .unwrap_or_else(|| fail("--amount <raw units> is required"));
    let token = get_arg(&["--token"]).unwrap_or_else(|| NATIVE_TOKEN_ADDRESS.to_string());
    let merchant_usd: Option<Decimal> = parse_arg(&["--usd"], "USD amount");

    let chain = app_config
        .chains
        .iter()
        .find(|c| c.chain_id == chain_id)
        .cloned();
    let chain_name = chain
        .as_ref()
        .map(|c| c.name.clone())
        .unwrap_or_else(|| format!("chain {}", chain_id));
    let symbol = get_arg(&["--symbol"])
        .or_else(|| chain.as_ref().map(|c| c.native_symbol.clone()))
        .unwrap_or_else(|| "ETH".to_string());
    let decimals: u8 = parse_arg(&["--decimals"], "decimals").unwrap_or(18);

    let registry = ChainRegistry::from_config(&app_config.chains, &app_config.monitor)
        .unwrap_or_else(|e| fail(&format!("failed to build chain registry: {}", e)));
    tracing::info!(chains = ?registry.chain_ids(), "Chain registry ready");

    let runtime = tokio::runtime::Runtime::new()
        .unwrap_or_else(|e| fail(&format!("failed to start runtime: {}", e)));

    let code = runtime.block_on(async move {
        let monitor = PaymentMonitor::new(registry, app_config.monitor.clone());
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let error_tx = done_tx.clone();

        let callbacks = PaymentCallbacks::new(
            move |receipt| {
                println!(
                    "PAID {} {} (decimals {}) tx {}",
                    receipt.token_symbol, receipt.address, receipt.decimals, receipt.tx_hash
                );
                let _ = done_tx.send(0);
            },
            move |message| {
                eprintln!("pos-monitor: {}", message);
                let _ = error_tx.send(1);
            },
        );

        let request = PaymentRequest {
            recipient_address: recipient,
            token_address: token,
            expected_amount: amount,
            token_symbol: symbol,
            decimals,
            merchant_usd,
            chain_id,
            chain_name,
        };

        if monitor.start(request, callbacks).is_err() {
            return 1;
        }
        if let Some(session) = monitor.current_session() {
            println!(
                "Waiting for {} {} on {} (session {}, {})",
                session.expected_amount,
                session.token_symbol,
                session.chain_name,
                session.session_id,
                session.mode
            );
        }

        tokio::select! {
            code = done_rx.recv() => code.unwrap_or(1),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping monitor");
                monitor.stop();
                130
            }
        }
    });

    drop(runtime);
    drop(log_guard);
    std::process::exit(code);
}
