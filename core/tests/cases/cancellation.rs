use crate::common::*;
use lockstep_core::*;

/// On a kick, destroys `victim` and notes how many entries went with it.
struct Killer {
    victim: DeviceId,
    journal: Journal,
}

impl Handler<Msg> for Killer {
    fn handle(&mut self, at: Timestamp, event: Msg, sched: &mut EventScheduler<'_, Msg>) -> SimResult<()> {
        if event == Msg::Kick {
            let removed = sched.cancel_device(self.victim)?;
            self.journal
                .lock()
                .unwrap()
                .push((sched.round(), at, sched.source(), Msg::Note(removed as u64)));
        }
        Ok(())
    }
}

#[test]
fn destroy_removes_every_pending_entry() {
    let journal = Journal::default();
    let partition = Partition::new().with(DeviceId(0), 0, 0).with(DeviceId(1), 0, 0);
    let mut engine: Engine<Msg> = Engine::single_process(EngineConfig::default(), partition).unwrap();
    engine.register(DeviceId(0), Recorder { journal: journal.clone() }).unwrap();
    engine.register(DeviceId(1), Recorder { journal: journal.clone() }).unwrap();
    for at in [3, 8, 13] {
        engine.inject(t(at), DeviceId(0), Msg::Note(at)).unwrap();
    }
    engine.inject(t(5), DeviceId(1), Msg::Note(5)).unwrap();

    assert_eq!(engine.destroy(DeviceId(0)).unwrap(), 3);
    assert_eq!(engine.pending(), 1);

    let report = engine.run().unwrap();
    assert_eq!(report.total_delivered(), 1);
    assert_eq!(*journal.lock().unwrap(), vec![(0, t(5), DeviceId(1), Msg::Note(5))]);
}

#[test]
fn destroyed_device_cannot_come_back() {
    let partition = Partition::new().with(DeviceId(0), 0, 0);
    let mut engine: Engine<Msg> = Engine::single_process(EngineConfig::default(), partition).unwrap();
    engine.register(DeviceId(0), Recorder { journal: Journal::default() }).unwrap();
    assert!(engine.units()[0].has_device(DeviceId(0)));
    engine.destroy(DeviceId(0)).unwrap();
    assert!(!engine.units()[0].has_device(DeviceId(0)));

    assert_eq!(
        engine.destroy(DeviceId(0)).unwrap_err(),
        SimError::UnknownDevice { device: DeviceId(0) }
    );
    assert_eq!(
        engine
            .register(DeviceId(0), Recorder { journal: Journal::default() })
            .unwrap_err(),
        SimError::DeviceAlreadyRegistered { device: DeviceId(0) }
    );
    assert_eq!(
        engine.destroy(DeviceId(7)).unwrap_err(),
        SimError::UnknownDevice { device: DeviceId(7) }
    );
}

#[test]
fn handler_cancels_a_neighbour_and_late_traffic_is_dropped() {
    // D0 and D2 share unit 0; D1 runs on unit 1.
    let journal = Journal::default();
    let j = journal.clone();
    let outcome = TestHarness::run(
        &Scenario::new(3, 1, 2, 10),
        move |device| -> Box<dyn Handler<Msg>> {
            match device.0 {
                0 => Box::new(Killer {
                    victim: DeviceId(2),
                    journal: j.clone(),
                }),
                1 => Box::new(Sender {
                    target: DeviceId(2),
                    delay: 20,
                    message: Msg::Note(20),
                }),
                _ => Box::new(Recorder { journal: j.clone() }),
            }
        },
        &[
            (t(0), DeviceId(0), Msg::Kick),
            (t(0), DeviceId(1), Msg::Kick),
            (t(5), DeviceId(2), Msg::Note(5)),
        ],
    )
    .unwrap();

    // The entry at T=5 went with the device; the one from unit 1 arrived
    // after it was gone and was discarded.
    assert_eq!(*journal.lock().unwrap(), vec![(0, t(0), DeviceId(0), Msg::Note(1))]);
    let report = &outcome.reports[0];
    assert_eq!(report.total_delivered(), 2);
    assert_eq!(report.pending, 0);
}

#[test]
fn cancelling_a_device_on_another_unit_is_refused() {
    let err = TestHarness::run(
        &Scenario::new(2, 1, 2, 10),
        |device| -> Box<dyn Handler<Msg>> {
            Box::new(Killer {
                victim: DeviceId(1 - device.0),
                journal: Journal::default(),
            })
        },
        &[(t(0), DeviceId(0), Msg::Kick)],
    )
    .err()
    .unwrap();

    assert_eq!(err, SimError::NotLocal { device: DeviceId(1), rank: 0 });
}

#[test]
fn device_may_cancel_itself() {
    struct SelfDestruct;
    impl Handler<Msg> for SelfDestruct {
        fn handle(&mut self, _at: Timestamp, event: Msg, sched: &mut EventScheduler<'_, Msg>) -> SimResult<()> {
            if event == Msg::Kick {
                let me = sched.source();
                sched.schedule_delay(TimeDelta::from_ticks(1), me, Msg::Note(1))?;
                sched.cancel_device(me)?;
            }
            Ok(())
        }
    }

    let partition = Partition::new().with(DeviceId(0), 0, 0);
    let mut engine: Engine<Msg> = Engine::single_process(EngineConfig::default(), partition).unwrap();
    engine.register(DeviceId(0), SelfDestruct).unwrap();
    engine.inject(t(0), DeviceId(0), Msg::Kick).unwrap();
    engine.inject(t(4), DeviceId(0), Msg::Kick).unwrap();

    let report = engine.run().unwrap();
    assert_eq!(report.total_delivered(), 1);
    assert_eq!(report.pending, 0);
}
