//! Watermark monotonicity under random success/crash sequences

mod helpers;

use helpers::*;
use proptest::prelude::*;
use survey_etl::models::{sentinel_watermark, PackageName};
use survey_etl::store::{MemoryAnalyticsStore, RunCycleStore};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn watermark_never_decreases(outcomes in prop::collection::vec(any::<bool>(), 1..20)) {
        let store = MemoryAnalyticsStore::new();

        runtime().block_on(async {
            let mut previous = store
                .last_successful_watermark(PackageName::Survey)
                .await
                .unwrap();
            prop_assert_eq!(previous, sentinel_watermark());

            for succeeded in outcomes {
                let run = store.begin_run(PackageName::Survey, "prop").await.unwrap();
                if succeeded {
                    prop_assert!(store.complete_run(run.id, PackageName::Survey).await.unwrap());
                }

                let current = store
                    .last_successful_watermark(PackageName::Survey)
                    .await
                    .unwrap();
                prop_assert!(current >= previous);
                if succeeded {
                    prop_assert_eq!(Some(current), run.end_time);
                } else {
                    prop_assert_eq!(current, previous);
                }
                previous = current;
            }
            Ok(())
        })?;
    }

    #[test]
    fn outages_never_move_the_pipeline_watermark(
        outages in prop::collection::vec(any::<bool>(), 1..8)
    ) {
        let env = TestEnv::new();
        env.add_survey(yes_no_survey());
        env.add_submission(yes_submission());

        runtime().block_on(async {
            let mut previous = env.watermark(PackageName::Submission).await;

            for outage in outages {
                env.source.set_unavailable(outage).unwrap();
                let result = env.orchestrator.run(PackageName::Submission).await;
                prop_assert_eq!(result.is_err(), outage);

                let current = env.watermark(PackageName::Submission).await;
                prop_assert!(current >= previous);
                if outage {
                    prop_assert_eq!(current, previous);
                }
                previous = current;
            }
            Ok(())
        })?;
    }
}
