//! Waveform conditioning applied to decoded events: trigger-point jitter
//! correction, cell-#0 alignment of daisy-chained boards and removal of the
//! domino-wave spikes of the DRS4 chip.

use crate::event::{ChannelId, Event, N_CELLS, N_CHANNELS};
use log::trace;
use ndarray::{ArrayView1, ArrayViewMut2, Axis};

const SPIKE_THRESHOLD_MV: f32 = 20.0;
const MAX_SPIKES: usize = 10;
const SPIKE_STEP_MV: f32 = 14.8;
const SPIKE_INTERPOLATION_MV: f32 = 15.0;
/// Cell of the second half of a double spike straddling cell 1023/0.
const DOUBLE_SPIKE_CELL: usize = 1020;
const ALIGN_TOLERANCE_NS: f32 = 1e-3;

/// Trigger configuration needed to locate the trigger edge in an event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerPoint {
    /// Channel of the primary board carrying the trigger, `None` for an
    /// external trigger.
    pub channel: Option<ChannelId>,
    pub level_mv: f32,
    pub negative: bool,
    /// Where the crossing should sit after correction, in ns.
    pub nominal_ns: f32,
}

/// All linearly interpolated crossings of `level_mv`, in time order.
pub fn find_crossings(
    time: ArrayView1<'_, f32>,
    wave: ArrayView1<'_, f32>,
    level_mv: f32,
    negative: bool,
) -> Vec<f32> {
    let n = time.len().min(wave.len());
    let mut crossings = Vec::new();
    for i in 0..n.saturating_sub(1) {
        let (v0, v1) = (wave[i], wave[i + 1]);
        let crossed = if negative {
            v0 >= level_mv && v1 < level_mv
        } else {
            v0 <= level_mv && v1 > level_mv
        };
        if crossed {
            let frac = (level_mv - v0) / (v1 - v0);
            crossings.push(time[i] + (time[i + 1] - time[i]) * frac);
        }
    }
    crossings
}

/// Shifts the primary board so its trigger crossing lands on
/// `trigger.nominal_ns`, then aligns boards with a reference clock.
///
/// With more than two crossings (periodic signals) the crossing closest to the
/// nominal position is used, otherwise the first one. Returns the shift
/// subtracted from the primary board, if any.
pub fn correct_trigger_point(
    event: &mut Event,
    trigger: &TriggerPoint,
    refclk: &[bool],
    wrap_period_ns: f32,
) -> Option<f32> {
    let mut applied = None;
    if let (Some(channel), true) = (trigger.channel, event.n_boards() > 0) {
        let crossings = match (event.time(0, channel), event.waveform(0, channel)) {
            (Some(t), Some(v)) => find_crossings(t, v, trigger.level_mv, trigger.negative),
            _ => Vec::new(),
        };
        let chosen = if crossings.len() > 2 {
            crossings.iter().copied().min_by(|a, b| {
                (a - trigger.nominal_ns)
                    .abs()
                    .total_cmp(&(b - trigger.nominal_ns).abs())
            })
        } else {
            crossings.first().copied()
        };
        if let Some(t) = chosen {
            let delta = t - trigger.nominal_ns;
            event
                .time
                .index_axis_mut(Axis(0), 0)
                .mapv_inplace(|x| x - delta);
            applied = Some(delta);
        }
    }
    align_boards(event, refclk, wrap_period_ns);
    applied
}

/// Aligns every secondary board with `refclk[b]` set so that its cell #0
/// coincides with the primary board's cell #0. Negative offsets are wrapped
/// into `[0, wrap_period_ns)`.
pub fn align_boards(event: &mut Event, refclk: &[bool], wrap_period_ns: f32) {
    if event.n_boards() < 2 {
        return;
    }
    let cell0 = |tc: u16| (N_CELLS - tc as usize % N_CELLS) % N_CELLS;
    let ch0 = ChannelId::ALL[0];
    let t0 = match event.time(0, ch0) {
        Some(t) => t[cell0(event.boards[0].trigger_cell)],
        None => return,
    };
    for b in 1..event.n_boards() {
        if !refclk.get(b).copied().unwrap_or(false) {
            continue;
        }
        let t1 = match event.time(b, ch0) {
            Some(t) => t[cell0(event.boards[b].trigger_cell)],
            None => continue,
        };
        let mut dt = t1 - t0;
        if dt.abs() < ALIGN_TOLERANCE_NS {
            continue;
        }
        if dt < 0.0 && wrap_period_ns > 0.0 {
            dt = dt.rem_euclid(wrap_period_ns);
        }
        trace!("board {b}: cell #0 offset {dt:.3} ns");
        event
            .time
            .index_axis_mut(Axis(0), b)
            .mapv_inplace(|x| x - dt);
    }
}

/// Replaces the first two samples of each channel by a linear extrapolation
/// of the next two.
pub fn extrapolate_first_samples(mut voltage: ArrayViewMut2<'_, f32>) {
    for mut row in voltage.rows_mut() {
        if row.len() >= 4 {
            row[1] = 2.0 * row[2] - row[3];
            row[0] = 2.0 * row[1] - row[2];
        }
    }
}

/// Removes domino-wave spikes from one board's `(channel, sample)` voltages.
///
/// A spike is a two-cell excursion at a fixed cell position, visible on
/// several channels at once. Returns the number of repaired spike positions.
pub fn remove_spikes(
    mut voltage: ArrayViewMut2<'_, f32>,
    trigger_cell: u16,
    cascading: bool,
) -> usize {
    let n_seg = if cascading { 2 * N_CHANNELS } else { N_CHANNELS };
    let min_depth = if cascading { 2 * N_CELLS } else { N_CELLS };
    if voltage.nrows() < N_CHANNELS || voltage.ncols() < min_depth {
        return 0;
    }
    let tc = trigger_cell as usize % N_CELLS;
    let locate = |seg: usize| {
        if cascading {
            (seg / 2, (seg % 2) * N_CELLS)
        } else {
            (seg, 0)
        }
    };

    // back to cell order
    let mut cells = vec![vec![0f32; N_CELLS]; n_seg];
    for (seg, w) in cells.iter_mut().enumerate() {
        let (c, ofs) = locate(seg);
        for j in 0..N_CELLS {
            w[(j + tc) % N_CELLS] = voltage[[c, ofs + j]];
        }
    }

    let mut candidates = vec![Vec::<usize>::new(); n_seg];
    for j in 0..N_CELLS {
        for (seg, w) in cells.iter().enumerate() {
            let f = -w[j] + w[(j + 1) % N_CELLS] + w[(j + 2) % N_CELLS] - w[(j + 3) % N_CELLS];
            if f.abs() > SPIKE_THRESHOLD_MV {
                if candidates[seg].len() >= MAX_SPIKES {
                    trace!("too many spike candidates in segment {seg}, leaving waveform alone");
                    return 0;
                }
                candidates[seg].push(j);
            }
        }
    }
    for (seg, w) in cells.iter().enumerate() {
        let list = &mut candidates[seg];
        if w[0] + w[1] - 2.0 * w[2] > SPIKE_THRESHOLD_MV && list.len() < MAX_SPIKES {
            list.push(0);
        }
        if -2.0 * w[1021] + w[1022] + w[1023] > SPIKE_THRESHOLD_MV && list.len() < MAX_SPIKES {
            list.push(DOUBLE_SPIKE_CELL);
        }
    }

    // another segment must show the candidate at its own or its mirror cell
    let mut confirmed: Vec<usize> = Vec::new();
    for (i, list) in candidates.iter().enumerate() {
        for &sp in list {
            let mirror = (N_CELLS + DOUBLE_SPIKE_CELL - sp) % N_CELLS;
            let corroborated = candidates
                .iter()
                .enumerate()
                .any(|(k, l)| k != i && (l.contains(&sp) || l.contains(&mirror)));
            if corroborated && confirmed.len() < MAX_SPIKES && !confirmed.contains(&sp) {
                confirmed.push(sp);
            }
        }
    }

    let rotated = |sp: usize| (sp + N_CELLS - tc) % N_CELLS;
    let mut k = 0;
    while k < confirmed.len() {
        let double = k + 1 < confirmed.len()
            && confirmed[k] == 0
            && confirmed[k + 1] == DOUBLE_SPIKE_CELL;
        for seg in 0..n_seg {
            let (c, ofs) = locate(seg);
            let mut row = voltage.row_mut(c);
            let at = |i: usize| ofs + i % N_CELLS;
            if double {
                let j = rotated(confirmed[k]).min(rotated(confirmed[k + 1]));
                let (x, y) = (row[at(j + 1)], row[at(j + 6)]);
                for m in 1..=4 {
                    let idx = at(j + 1 + m);
                    row[idx] = if (x - y).abs() < SPIKE_INTERPOLATION_MV {
                        x + m as f32 * (y - x) / 5.0
                    } else {
                        row[idx] - SPIKE_STEP_MV
                    };
                }
            } else {
                let j = rotated(confirmed[k]);
                let (x, y) = (row[at(j)], row[at(j + 3)]);
                for m in 1..=2 {
                    let idx = at(j + m);
                    row[idx] = if (x - y).abs() < SPIKE_INTERPOLATION_MV {
                        x + m as f32 * (y - x) / 3.0
                    } else {
                        row[idx] - SPIKE_STEP_MV
                    };
                }
            }
        }
        k += if double { 2 } else { 1 };
    }
    confirmed.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Array2};

    const DT: f32 = 0.2;

    fn event_with(boards: usize, f: impl Fn(f32) -> f32) -> Event {
        let mut ev = Event::new(boards, 1024);
        for b in 0..boards {
            for c in 0..4 {
                for i in 0..1024 {
                    let t = i as f32 * DT;
                    ev.time[[b, c, i]] = t;
                    ev.voltage[[b, c, i]] = f(t);
                }
            }
        }
        ev
    }

    fn trigger(level_mv: f32, nominal_ns: f32) -> TriggerPoint {
        TriggerPoint {
            channel: ChannelId::new(0),
            level_mv,
            negative: false,
            nominal_ns,
        }
    }

    fn crossings_of(ev: &Event, trg: &TriggerPoint) -> Vec<f32> {
        let ch = trg.channel.unwrap();
        find_crossings(
            ev.time(0, ch).unwrap(),
            ev.waveform(0, ch).unwrap(),
            trg.level_mv,
            trg.negative,
        )
    }

    #[test]
    fn crossing_moves_to_nominal_position() {
        let mut ev = event_with(1, |t| (t - 97.3) * 50.0 + 250.0);
        let before = ev.time.clone();
        let trg = trigger(250.0, 100.0);

        let delta = correct_trigger_point(&mut ev, &trg, &[], 204.8).unwrap();
        assert!((delta + 2.7).abs() < 1e-3, "delta {delta}");

        let c = crossings_of(&ev, &trg);
        assert_eq!(c.len(), 1);
        assert!((c[0] - 100.0).abs() < 1e-3);
        for (a, b) in ev.time.iter().zip(before.iter()) {
            assert!((a - b - 2.7).abs() < 1e-3);
        }
    }

    #[test]
    fn correction_is_idempotent() {
        let mut ev = event_with(1, |t| (t - 61.13) * 20.0);
        let trg = trigger(0.0, 102.4);
        correct_trigger_point(&mut ev, &trg, &[], 204.8);
        let once = ev.time.clone();
        let delta = correct_trigger_point(&mut ev, &trg, &[], 204.8).unwrap();
        assert!(delta.abs() < 1e-3);
        for (a, b) in ev.time.iter().zip(once.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn periodic_signal_uses_closest_crossing() {
        let period = 20.0;
        let mut ev = event_with(1, |t| {
            300.0 * (2.0 * std::f32::consts::PI * (t - 1.05) / period).sin()
        });
        let trg = trigger(0.0, 102.4);
        assert!(crossings_of(&ev, &trg).len() > 2);

        let delta = correct_trigger_point(&mut ev, &trg, &[], 204.8).unwrap();
        assert!((delta + 1.35).abs() < 1e-2, "delta {delta}");
        assert!(crossings_of(&ev, &trg)
            .iter()
            .any(|c| (c - 102.4).abs() < 1e-2));
    }

    #[test]
    fn two_crossings_use_the_first() {
        let period = 120.0;
        let mut ev = event_with(1, |t| {
            300.0 * (2.0 * std::f32::consts::PI * (t - 1.05) / period).sin()
        });
        let trg = trigger(0.0, 102.4);
        assert_eq!(crossings_of(&ev, &trg).len(), 2);

        let delta = correct_trigger_point(&mut ev, &trg, &[], 204.8).unwrap();
        assert!((delta + 101.35).abs() < 1e-2, "delta {delta}");
    }

    #[test]
    fn falling_edge() {
        let mut ev = event_with(1, |t| (50.0 - t) * 10.0);
        let mut trg = trigger(-100.0, 40.0);
        trg.negative = true;
        let delta = correct_trigger_point(&mut ev, &trg, &[], 204.8).unwrap();
        assert!((delta - 20.0).abs() < 1e-3);
    }

    #[test]
    fn no_crossing_leaves_times_alone() {
        let mut ev = event_with(1, |_| -50.0);
        let before = ev.time.clone();
        assert_eq!(correct_trigger_point(&mut ev, &trigger(250.0, 100.0), &[], 204.8), None);
        assert_eq!(ev.time, before);
    }

    #[test]
    fn secondary_boards_follow_cell_zero() {
        let mut ev = event_with(3, |_| 0.0);
        ev.boards[0].trigger_cell = 24;
        ev.boards[1].trigger_cell = 24;
        ev.boards[2].trigger_cell = 24;
        ev.time
            .slice_mut(s![1, .., ..])
            .mapv_inplace(|t| t + 300.0);
        ev.time
            .slice_mut(s![2, .., ..])
            .mapv_inplace(|t| t + 300.0);

        let ext = TriggerPoint {
            channel: None,
            ..trigger(0.0, 0.0)
        };
        correct_trigger_point(&mut ev, &ext, &[true, true, false], 204.8);

        // cell #0 is sample 1000 on every board
        assert!((ev.time[[1, 0, 1000]] - ev.time[[0, 0, 1000]]).abs() < 1e-3);
        assert!((ev.time[[1, 3, 5]] - 1.0).abs() < 1e-3);
        assert!((ev.time[[2, 0, 1000]] - 500.0).abs() < 1e-3);
    }

    #[test]
    fn negative_offset_wraps_into_one_period() {
        let mut ev = event_with(2, |_| 0.0);
        ev.boards[0].trigger_cell = 24;
        ev.boards[1].trigger_cell = 1000;
        // t0 = 200.0 (sample 1000), t1 = 4.8 (sample 24)
        align_boards(&mut ev, &[false, true], 204.8);
        let dt = 4.8 - ev.time[[1, 0, 24]];
        assert!((dt - 9.6).abs() < 1e-3, "dt {dt}");
        assert!((0.0..204.8).contains(&dt));
    }

    fn flat(depth: usize) -> Array2<f32> {
        Array2::zeros((4, depth))
    }

    #[test]
    fn spike_on_two_channels_is_removed() {
        let tc = 100u16;
        let mut v = flat(1024);
        // cells 301/302 show up at display samples 201/202
        for c in [0, 1] {
            v[[c, 201]] = 15.0;
            v[[c, 202]] = 15.0;
        }
        assert_eq!(remove_spikes(v.view_mut(), tc, false), 1);
        assert!(v.iter().all(|x| x.abs() < 1e-4));
    }

    #[test]
    fn spike_on_one_channel_is_kept() {
        let mut v = flat(1024);
        v[[2, 201]] = 15.0;
        v[[2, 202]] = 15.0;
        let before = v.clone();
        assert_eq!(remove_spikes(v.view_mut(), 100, false), 0);
        assert_eq!(v, before);
    }

    #[test]
    fn spike_at_its_own_mirror_cell_needs_a_second_channel() {
        // candidate 510 is its own mirror
        let mut v = flat(1024);
        v[[2, 511]] = 15.0;
        v[[2, 512]] = 15.0;
        let before = v.clone();
        assert_eq!(remove_spikes(v.view_mut(), 0, false), 0);
        assert_eq!(v, before);
    }

    #[test]
    fn mirror_pair_on_one_channel_is_kept() {
        let mut v = flat(1024);
        for cell in [101, 102, 921, 922] {
            v[[1, cell]] = 15.0;
        }
        let before = v.clone();
        assert_eq!(remove_spikes(v.view_mut(), 0, false), 0);
        assert_eq!(v, before);
    }

    #[test]
    fn mirror_pair_across_channels_is_removed() {
        let mut v = flat(1024);
        for cell in [101, 102] {
            v[[0, cell]] = 15.0;
        }
        for cell in [921, 922] {
            v[[1, cell]] = 15.0;
        }
        assert_eq!(remove_spikes(v.view_mut(), 0, false), 2);
        assert!(v.iter().all(|x| x.abs() < 1e-4));
    }

    #[test]
    fn busy_signal_is_not_treated_as_spikes() {
        let mut v = flat(1024);
        for i in 0..1024 {
            let x = if (i / 8) % 2 == 0 { 100.0 } else { -100.0 };
            for c in 0..4 {
                v[[c, i]] = x;
            }
        }
        let before = v.clone();
        assert_eq!(remove_spikes(v.view_mut(), 0, false), 0);
        assert_eq!(v, before);
    }

    #[test]
    fn spikes_in_cascading_halves() {
        let mut v = flat(2048);
        for c in [0, 3] {
            v[[c, 1024 + 501]] = 15.0;
            v[[c, 1024 + 502]] = 15.0;
        }
        assert_eq!(remove_spikes(v.view_mut(), 0, true), 1);
        assert!(v.slice(s![.., 1024..]).iter().all(|x| x.abs() < 1e-4));
    }

    #[test]
    fn first_samples_are_extrapolated() {
        let mut v = flat(8);
        for i in 0..8 {
            v[[0, i]] = i as f32 * 2.0;
        }
        v[[0, 0]] = 99.0;
        v[[0, 1]] = -99.0;
        extrapolate_first_samples(v.view_mut());
        assert_eq!(v[[0, 1]], 2.0);
        assert_eq!(v[[0, 0]], 0.0);
    }
}
