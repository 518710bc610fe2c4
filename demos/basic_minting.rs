//! Basic minting and redemption example.
//!
//! Walks one holder through minting BPro and Doc, opening a leveraged
//! BProx position, and redeeming it with a vendor attached.

use collateral_engine::core::error::CoreError;
use collateral_engine::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn print_events(events: &[ProtocolEvent]) {
    for event in events {
        match event {
            ProtocolEvent::Exchange(x) => println!(
                "  {:?}: {} {} for {} reserve (interest {}, commission {}, vendor {})",
                x.operation,
                x.amount,
                x.token,
                x.reserve_total,
                x.interest,
                x.commission.reserve,
                x.vendor_fee.reserve
            ),
            ProtocolEvent::StateChanged { from, to } => println!("  state: {} → {}", from, to),
            other => println!("  {:?}", other),
        }
    }
}

fn main() -> Result<(), CoreError> {
    env_logger::init();

    println!("╔══════════════════════════════════════════════╗");
    println!("║  collateral-engine: Basic Minting Example    ║");
    println!("╚══════════════════════════════════════════════╝\n");

    let alice = AccountId::new("alice");
    let vendor = AccountId::new("wallet-vendor");

    let mut config = ProtocolConfig::default();
    config.fees = config
        .fees
        .with(OperationKind::MintBPro, FeeRates::new(dec!(0.001), Decimal::ZERO))
        .with(OperationKind::RedeemBProx, FeeRates::new(dec!(0.002), Decimal::ZERO));
    config.register_vendor(vendor.clone(), dec!(0.005));

    let mut ledger = InMemoryAssetLedger::new();
    ledger.fund_reserve(&alice, dec!(50));
    ledger.fund_fee_token(&vendor, dec!(10));
    ledger.approve_fee_token(&vendor, dec!(10));
    let mut protocol = Protocol::new(config, FixedPriceFeed::new(dec!(10000)), ledger)?;

    // The vendor only earns its markup against staked fee token.
    print_events(&protocol.add_vendor_stake(&vendor, dec!(10))?);
    println!();

    // --- Step 1: Equity ---
    println!("━━━ Step 1: Mint 18 reserve of BPro ━━━\n");
    print_events(&protocol.mint(ExchangeRequest::new(TokenKind::BPro, dec!(18), alice.clone()))?);
    println!();

    // --- Step 2: Stable token ---
    println!("━━━ Step 2: Mint 8 reserve of Doc ━━━\n");
    println!("  max issuable: {}", protocol.max_issuable(&BucketId::c0())?);
    print_events(&protocol.mint(ExchangeRequest::new(TokenKind::Doc, dec!(8), alice.clone()))?);
    println!();

    // --- Step 3: Leverage ---
    let x2 = BucketId::new("X2");
    println!("━━━ Step 3: Mint 5 reserve of BProx in X2 ━━━\n");
    println!("  days to settlement: {}", protocol.days_to_settlement());
    println!("  daily rate:         {}", protocol.bprox_interest_rate(&x2, dec!(5))?);
    print_events(&protocol.mint(
        ExchangeRequest::new(TokenKind::BProx, dec!(5), alice.clone()).in_bucket(x2.clone()),
    )?);
    println!();

    // --- Step 4: Exit through a vendor ---
    println!("━━━ Step 4: Redeem BProx through a vendor ━━━\n");
    protocol.advance_blocks(2 * 2_880);
    let held = protocol.balance_of(TokenKind::BProx, &x2, &alice);
    print_events(&protocol.redeem(
        ExchangeRequest::new(TokenKind::BProx, held, alice.clone())
            .in_bucket(x2)
            .with_vendor(vendor.clone()),
    )?);
    println!();

    println!("{}", protocol.report()?);
    println!("Alice reserve:  {}", protocol.ledger().reserve_balance(&alice));
    println!("Vendor reserve: {}", protocol.ledger().reserve_balance(&vendor));
    println!("Vendor stake:   {:?}", protocol.vendor_stake(&vendor));
    Ok(())
}
