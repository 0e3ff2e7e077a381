use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crate::common::*;

#[test]
fn test_concurrent_first_verifications_activate_once_within_quota() {
    let ctx = TestContext::new();
    let (tenant, card) = {
        let conn = ctx.conn();
        let tenant = create_tenant(&conn, "app");
        let card = create_card(&conn, Some(&tenant.id), "RACE", 3, Some(30));
        (tenant, card)
    };

    let t0 = now();
    let admitted = AtomicUsize::new(0);
    thread::scope(|s| {
        for i in 0..8 {
            let pool = ctx.pool.clone();
            let tenant_id = tenant.id.clone();
            let admitted = &admitted;
            s.spawn(move || {
                let mut conn = pool.get().unwrap();
                let device = format!("device-{}", i);
                let outcome = ledger::verify(&mut conn, "RACE", &tenant_id, Some(&device), t0 + i).unwrap();
                if outcome.is_accepted() {
                    admitted.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(admitted.load(Ordering::SeqCst), 3);
    let conn = ctx.conn();
    assert_eq!(queries::count_bindings_for_card(&conn, &card.id).unwrap(), 3);

    let card = reload(&conn, &card);
    assert_eq!(card.status, CardStatus::Activated);
    let activated = card.activated_at.expect("activated");
    assert!((t0..t0 + 8).contains(&activated));
    assert_eq!(card.expire_at, Some(activated + 30 * 86_400));
}

#[test]
fn test_concurrent_redeems_have_a_single_winner() {
    let ctx = TestContext::new();
    let (tenant, card) = {
        let conn = ctx.conn();
        let tenant = create_tenant(&conn, "app");
        let card = create_card(&conn, Some(&tenant.id), "ONE-WINNER", 0, None);
        (tenant, card)
    };

    let winners = AtomicUsize::new(0);
    thread::scope(|s| {
        for _ in 0..8 {
            let pool = ctx.pool.clone();
            let tenant_id = tenant.id.clone();
            let winners = &winners;
            s.spawn(move || {
                let mut conn = pool.get().unwrap();
                if ledger::redeem(&mut conn, "ONE-WINNER", &tenant_id, None, now())
                    .unwrap()
                    .is_accepted()
                {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(winners.load(Ordering::SeqCst), 1);
    let conn = ctx.conn();
    assert_eq!(queries::list_use_logs_for_card(&conn, &card.id).unwrap().len(), 1);
}
