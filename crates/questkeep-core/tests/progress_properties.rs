use std::sync::Arc;

use chrono::NaiveDate;
use proptest::prelude::*;
use questkeep_core::{FixedClock, ProgressStore, QuestKind, QuestLimits};
use questkeep_store::MemoryStore;

#[derive(Clone, Debug)]
enum Op {
    Add { index: usize, amount: i64 },
    Kill { amount: i64 },
    Claim { index: usize },
    NextDay,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0_usize..6, -20_i64..300).prop_map(|(index, amount)| Op::Add { index, amount }),
        2 => (-5_i64..100).prop_map(|amount| Op::Kill { amount }),
        2 => (0_usize..6).prop_map(|index| Op::Claim { index }),
        1 => Just(Op::NextDay),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime")
}

proptest! {
    #[test]
    fn progress_stays_within_bounds(
        max_quests in 1_usize..6,
        max_required in 1_u32..400,
        max_step in 1_u32..80,
        ops in proptest::collection::vec(op(), 1..60),
    ) {
        let limits = QuestLimits { max_quests, max_required, max_progress_per_event: max_step };
        let clock = Arc::new(FixedClock::new(NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()));
        let rt = runtime();
        rt.block_on(async {
            let store = ProgressStore::builder(Arc::new(MemoryStore::new()))
                .limits(limits)
                .clock(clock.clone())
                .build();
            let initial = store.activate("p").await;
            let length = initial.quests.len();
            prop_assert!(length <= max_quests);

            for op in ops {
                match op {
                    Op::Add { index, amount } => {
                        let before = store.record("p").unwrap();
                        let update = store.add_progress("p", index, amount);
                        if let Some(update) = update {
                            prop_assert!(amount > 0);
                            let was = before.quests[index].progress;
                            prop_assert!(update.progress <= was + max_step);
                        }
                    }
                    Op::Kill { amount } => {
                        store.add_matching("p", &QuestKind::Kill, "zombie", amount);
                    }
                    Op::Claim { index } => {
                        let _ = store.claim("p", index);
                    }
                    Op::NextDay => clock.advance_days(1),
                }
                let record = store.record("p").unwrap();
                prop_assert_eq!(record.quests.len(), length);
                for quest in &record.quests {
                    prop_assert!(quest.progress <= quest.required);
                    prop_assert!(quest.required >= 1);
                    prop_assert!(quest.required <= max_required);
                }
            }
            Ok(())
        })?;
    }
}
