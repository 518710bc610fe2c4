//! Liquidation walkthrough.
//!
//! Builds a thinly covered system, queues a settlement, then crashes the
//! reserve price and follows the wind-down until every Doc holder exits.

use collateral_engine::core::error::CoreError;
use collateral_engine::prelude::*;
use rust_decimal_macros::dec;

fn main() -> Result<(), CoreError> {
    env_logger::init();

    println!("╔═══════════════════════════════════════════════════╗");
    println!("║  collateral-engine: Liquidation Walkthrough       ║");
    println!("╚═══════════════════════════════════════════════════╝\n");

    let holders: Vec<AccountId> = ["alice", "bob", "carol"].iter().map(|&n| AccountId::from(n)).collect();
    let trader = AccountId::new("trader");

    let mut ledger = InMemoryAssetLedger::new();
    for holder in &holders {
        ledger.fund_reserve(holder, dec!(10));
    }
    ledger.fund_reserve(&trader, dec!(10));
    let mut protocol = Protocol::new(ProtocolConfig::default(), FixedPriceFeed::new(dec!(10000)), ledger)?;

    for holder in &holders {
        protocol.mint(ExchangeRequest::new(TokenKind::BPro, dec!(2), holder.clone()))?;
    }
    for holder in &holders {
        protocol.mint(ExchangeRequest::new(TokenKind::Doc, dec!(0.8), holder.clone()))?;
    }
    protocol.mint(
        ExchangeRequest::new(TokenKind::BProx, dec!(1), trader.clone()).in_bucket(BucketId::new("X2")),
    )?;
    protocol.redeem_doc_request(&holders[0], dec!(2500))?;

    println!("━━━ Before the crash ━━━\n");
    println!("{}", protocol.report()?);

    // --- The reserve price falls ---
    for price in [dec!(7000), dec!(5000), dec!(2500)] {
        protocol.price_feed_mut().set_reserve_price(price);
        println!("━━━ Price {} ━━━\n", price);
        println!("  coverage: {}", protocol.coverage()?);
        let events = protocol.eval_liquidation(1)?;
        for event in &events {
            println!("  {:?}", event);
        }
        println!("  state:    {}\n", protocol.state());
    }

    // --- Close out the remaining leveraged positions ---
    while !protocol.eval_liquidation(1)?.is_empty() {}

    println!("━━━ Doc exits at the frozen price ━━━\n");
    if let Some(frozen) = protocol.frozen_price() {
        println!("  frozen reserve price: {}", frozen);
    }
    protocol.price_feed_mut().set_reserve_price(dec!(100));
    for holder in &holders {
        let docs = protocol.balance_of(TokenKind::Doc, &BucketId::c0(), holder);
        protocol.redeem_all_doc(holder)?;
        println!(
            "  {:<6} {:>8} DOC → reserve balance {}",
            holder,
            docs,
            protocol.ledger().reserve_balance(holder)
        );
    }

    match protocol.mint(ExchangeRequest::new(TokenKind::BPro, dec!(1), trader.clone())) {
        Err(e) => println!("\n  new mints are refused: {}", e),
        Ok(_) => println!("\n  unexpected: mint accepted after liquidation"),
    }
    println!(
        "  commission account: {}",
        protocol.ledger().reserve_balance(&protocol.config().commission_account)
    );
    println!("  journal entries:    {}", protocol.events().len());
    Ok(())
}
