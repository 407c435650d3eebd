use confique::Config;
use drs_osc::{
    read_all, AcquisitionController, Board, ChannelId, Conf, DrsReader, SimulatedBoard,
};
use std::time::Duration;

const CONFIG: &str = r#"
[run_settings]
multi_board = true
spike_removal = true
ring_buffer_mb = 1

[board_settings]
en_chans = [1, 2]
refclk = [1]

[trigger_settings]
auto = false
level = 0.1
"#;

fn load(dir: &tempfile::TempDir) -> Conf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, CONFIG).unwrap();
    Conf::builder().file(&path).load().unwrap()
}

#[test]
fn two_board_recording_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let conf = load(&dir);
    let boards: Vec<Box<dyn Board>> = vec![
        Box::new(SimulatedBoard::new(2801, 1)),
        Box::new(SimulatedBoard::new(2802, 2)),
    ];
    let controller = AcquisitionController::from_conf(boards, &conf).unwrap();
    let out = dir.path().join("run.dat");

    controller.start_recording(&out, 10).unwrap();
    controller.set_running(true).unwrap();
    for _ in 0..500 {
        if !controller.is_recording() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    controller.set_running(false).unwrap();
    assert!(!controller.is_recording());
    drop(controller);

    let events = read_all(&out).unwrap();
    assert_eq!(events.len(), 10);
    for (i, ev) in events.iter().enumerate() {
        assert_eq!(ev.serial as usize, i + 1);
        assert_eq!(ev.n_boards(), 2);
        assert_eq!(ev.boards[0].serial, 2801);
        assert_eq!(ev.boards[1].serial, 2802);
        assert_eq!(ev.boards[0].enabled, [true, true, false, false]);
    }

    // the rising edge of CH1 sits near the middle of the window
    let ch = ChannelId::ALL[0];
    let t = events[0].time(0, ch).unwrap();
    let v = events[0].waveform(0, ch).unwrap();
    let i = v.iter().position(|x| *x > 100.0).unwrap();
    assert!((t[i] - 102.4).abs() < 1.0, "edge at {} ns", t[i]);

    // cell #0 has one time on every channel of a board
    for b in 0..2 {
        let cell0 = (1024 - events[0].boards[b].trigger_cell as usize) % 1024;
        let t1 = events[0].time(b, ChannelId::ALL[0]).unwrap();
        let t2 = events[0].time(b, ChannelId::ALL[1]).unwrap();
        assert!((t1[cell0] - t2[cell0]).abs() < 1e-3);
    }

    let bytes = std::fs::read(&out).unwrap();
    let reader = DrsReader::new(&bytes).unwrap();
    assert_eq!(reader.calibration().boards.len(), 2);
    assert_eq!(reader.count(), 10);
}

#[test]
fn demo_controller_runs_without_boards() {
    let dir = tempfile::tempdir().unwrap();
    let conf = load(&dir);
    let controller = AcquisitionController::from_conf(Vec::new(), &conf).unwrap();
    controller.set_running(true).unwrap();
    controller
        .wait_for_events(2, Duration::from_secs(5))
        .unwrap();
    let v = controller.waveform(0, ChannelId::ALL[0]).unwrap();
    assert_eq!(v.len(), 1024);
    assert!(v.iter().all(|x| x.abs() < 110.0));
}
