use std::time::Duration;

use log::{info, warn};
use rand::Rng;
use riskex_core::{DEFAULT_SURE_VALUE, Payload, Resolution, Stimulus, StimulusKind};
use riskex_pump::RewardPump;
use riskex_timing::Timer;

use crate::surface::FeedbackTone;

/// Reward decided for a chosen stimulus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub reward: u32,
    pub resolution: Resolution,
}

/// Resolves `stimulus`, calling `draw` (uniform in `[0, 1)`) once for a
/// gamble and never otherwise. A gamble wins when the draw is below its
/// win probability.
pub fn resolve_with(stimulus: &Stimulus, draw: impl FnOnce() -> f64) -> Resolved {
    match stimulus.payload {
        Payload::Sure { value } => Resolved {
            reward: value,
            resolution: Resolution::Sure,
        },
        Payload::Gamble {
            win,
            lose,
            win_probability,
        } => {
            if draw() < win_probability {
                Resolved {
                    reward: win,
                    resolution: Resolution::Win,
                }
            } else {
                Resolved {
                    reward: lose,
                    resolution: Resolution::Lose,
                }
            }
        }
        Payload::Unknown => match stimulus.kind {
            StimulusKind::Sure => Resolved {
                reward: DEFAULT_SURE_VALUE,
                resolution: Resolution::Sure,
            },
            StimulusKind::Gamble => Resolved {
                reward: 0,
                resolution: Resolution::Unknown,
            },
        },
    }
}

pub fn resolve<R: Rng + ?Sized>(stimulus: &Stimulus, rng: &mut R) -> Resolved {
    resolve_with(stimulus, || rng.random::<f64>())
}

/// How pulses are spaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulsePlan {
    pub duration_ms: u32,
    pub gap: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub pulses: u32,
    pub confirmed: u32,
}

/// Delivers `count` pulses one after the other: tone, pump write (when
/// connected), then the gap. A pulse never starts before the previous one's
/// write has completed. Pump failures are logged and delivery carries on.
pub async fn deliver<T: Timer>(
    count: u32,
    plan: PulsePlan,
    pump: &dyn RewardPump,
    tone: &dyn FeedbackTone,
    timer: &T,
) -> Delivery {
    let mut delivery = Delivery::default();
    if count == 0 {
        return delivery;
    }
    info!("Delivering {count} reward pulse(s)");

    for pulse in 1..=count {
        tone.play().await;
        if pump.is_connected() {
            match pump.pulse(plan.duration_ms).await {
                Ok(()) => delivery.confirmed += 1,
                Err(e) => warn!("Failed to trigger pump on pulse {pulse}/{count}: {e}"),
            }
        }
        delivery.pulses += 1;
        timer.sleep(plan.gap).await;
    }

    if delivery.confirmed < delivery.pulses && pump.is_connected() {
        warn!(
            "Pump confirmed {} of {} pulses",
            delivery.confirmed, delivery.pulses
        );
    }
    delivery
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use riskex_pump::{
        CharacteristicRole, HardwareProfile, LoopbackTransport, PeripheralConfig,
        RewardPeripheral, Unplugged,
    };
    use riskex_timing::MonotonicTimer;

    use super::*;

    #[derive(Default)]
    struct CountingTone(AtomicU32);

    #[async_trait]
    impl FeedbackTone for CountingTone {
        async fn play(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn sure_resolution_never_draws() {
        let stim = Stimulus::sure("sure/sure3.png");
        for _ in 0..100 {
            let got = resolve_with(&stim, || panic!("sure stimuli must not draw"));
            assert_eq!(
                got,
                Resolved {
                    reward: 3,
                    resolution: Resolution::Sure
                }
            );
        }
    }

    #[test]
    fn gamble_threshold() {
        let stim = Stimulus::gamble("gamble7v1pw75.png");
        assert_eq!(resolve_with(&stim, || 0.0).reward, 7);
        assert_eq!(resolve_with(&stim, || 0.7499).resolution, Resolution::Win);
        assert_eq!(resolve_with(&stim, || 0.75).resolution, Resolution::Lose);
        assert_eq!(resolve_with(&stim, || 0.99).reward, 1);
    }

    #[test]
    fn gamble_win_rate_matches_probability() {
        let stim = Stimulus::gamble("gamble7v1pw75.png");
        let mut rng = StdRng::seed_from_u64(2024);
        let wins = (0..10_000)
            .filter(|_| resolve(&stim, &mut rng).resolution == Resolution::Win)
            .count();
        let rate = wins as f64 / 10_000.0;
        assert!((0.735..=0.765).contains(&rate), "win rate {rate}");
    }

    #[test]
    fn seeded_draws_match_reference_sequence() {
        let stim = Stimulus::gamble("gamble7v1pw75.png");
        let mut reference = StdRng::seed_from_u64(9);
        let expected: Vec<u32> = (0..100)
            .map(|_| if reference.random::<f64>() < 0.75 { 7 } else { 1 })
            .collect();

        let mut rng = StdRng::seed_from_u64(9);
        let got: Vec<u32> = (0..100).map(|_| resolve(&stim, &mut rng).reward).collect();
        assert_eq!(got, expected);
        assert!(got.contains(&7) && got.contains(&1));
    }

    #[test]
    fn unparseable_identities() {
        let sure = Stimulus::sure("sure/surefoo.png");
        assert_eq!(
            resolve_with(&sure, || 0.0),
            Resolved {
                reward: DEFAULT_SURE_VALUE,
                resolution: Resolution::Sure
            }
        );
        let gamble = Stimulus::gamble("gamble/gambleX.png");
        assert_eq!(
            resolve_with(&gamble, || panic!("unknown gambles must not draw")),
            Resolved {
                reward: 0,
                resolution: Resolution::Unknown
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pulses_are_sequential() {
        let transport =
            LoopbackTransport::new("BLENano_1").with_write_latency(Duration::from_millis(30));
        let pump = RewardPeripheral::new(
            transport.clone(),
            PeripheralConfig {
                keepalive: None,
                ..PeripheralConfig::default()
            },
        );
        assert!(pump.scan().await.unwrap());
        let tone = CountingTone::default();
        let timer = MonotonicTimer::new();
        let plan = PulsePlan {
            duration_ms: 100,
            gap: Duration::from_millis(200),
        };

        let delivery = deliver(3, plan, &pump, &tone, &timer).await;
        assert_eq!(
            delivery,
            Delivery {
                pulses: 3,
                confirmed: 3
            }
        );
        assert_eq!(tone.0.load(Ordering::SeqCst), 3);

        let duration = HardwareProfile::blenano()
            .uuid(CharacteristicRole::PumpDuration)
            .unwrap();
        let writes = transport.writes_to(duration);
        assert_eq!(writes.len(), 3);
        for pair in writes.windows(2) {
            assert!(pair[1].started >= pair[0].finished + Duration::from_millis(200));
        }
        pump.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn offline_pump_still_plays_tone_and_gaps() {
        let tone = CountingTone::default();
        let timer = MonotonicTimer::new();
        let plan = PulsePlan {
            duration_ms: 100,
            gap: Duration::from_millis(200),
        };
        let started = tokio::time::Instant::now();
        let delivery = deliver(2, plan, &Unplugged, &tone, &timer).await;
        assert_eq!(delivery.pulses, 2);
        assert_eq!(delivery.confirmed, 0);
        assert_eq!(tone.0.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_millis(400));

        let none = deliver(0, plan, &Unplugged, &tone, &timer).await;
        assert_eq!(none, Delivery::default());
        assert_eq!(tone.0.load(Ordering::SeqCst), 2);
    }
}
