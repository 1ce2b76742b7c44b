/// Drift filter turning a channel's measured balance into a signed frame
/// offset applied to the next scheduled buffer deadline.
///
/// Small offsets are absorbed through an averaged sub-frame slew so the
/// schedule realigns a frame at a time. An offset jumping by more than
/// `loss_max` (a dropout, tens to hundreds of frames at once) bypasses
/// the slew and moves the deadline by the full amount in one call.
#[derive(Debug, Clone, Copy)]
pub struct Correction {
    loss_max: i64,
    drift_max: i64,
    correction: i64,
    average_offset: i64,
}

impl Default for Correction {
    fn default() -> Self {
        Self {
            loss_max: 128,
            drift_max: 64,
            correction: 0,
            average_offset: 0,
        }
    }
}

impl Correction {
    pub fn set_drift_limit(&mut self, limit: i64) {
        self.drift_max = limit.max(0);
    }

    pub fn set_loss_limit(&mut self, limit: i64) {
        self.loss_max = limit.max(0);
    }

    pub fn clear(&mut self) {
        self.correction = 0;
    }

    pub fn correction(&self) -> i64 {
        self.correction
    }

    pub fn correct(&mut self, balance: i64, target: i64) -> i64 {
        let offset = target - balance;
        self.average_offset = (self.average_offset + offset) / 2;
        if (offset - self.correction).abs() > self.loss_max {
            self.correction = offset;
        } else {
            self.correction += (self.average_offset - self.correction) / (self.drift_max + 1);
        }
        self.correction
    }
}

#[cfg(test)]
mod tests {
    use super::Correction;

    #[test]
    fn dropout_jumps_in_one_call() {
        let mut filter = Correction::default();
        assert_eq!(filter.correct(1000, 0), -1000);
        assert_eq!(filter.correction(), -1000);
    }

    #[test]
    fn recovered_offset_snaps_back_after_dropout() {
        let mut filter = Correction::default();
        filter.correct(1000, 0);
        // Offset back near target differs from the stored correction by
        // more than the loss threshold, so it is treated as another
        // rigorous step rather than slewed over thousands of calls.
        assert_eq!(filter.correct(0, 0), 0);
    }

    #[test]
    fn growing_balance_stays_bounded_and_monotone() {
        let mut filter = Correction::default();
        let mut last = 0;
        for balance in [0_i64, 10, 20, 30, 40, 50] {
            let correction = filter.correct(balance, 0);
            assert!(correction <= last);
            assert!(correction.abs() <= 50);
            last = correction;
        }
    }

    #[test]
    fn constant_offset_slews_one_frame_at_a_time() {
        let mut filter = Correction::default();
        let mut last = 0;
        for _ in 0..100 {
            let correction = filter.correct(100, 0);
            let step = correction - last;
            assert!(step == 0 || step == -1);
            last = correction;
        }
        // The integer slew stalls once the averaged offset is within
        // drift_max of the correction.
        assert_eq!(filter.correction(), -35);
    }

    #[test]
    fn matched_target_leaves_correction_alone() {
        let mut filter = Correction::default();
        for balance in [5_i64, -3, 17, 0] {
            assert_eq!(filter.correct(balance, balance), 0);
        }
    }

    #[test]
    fn clear_resets_state() {
        let mut filter = Correction::default();
        filter.correct(1000, 0);
        filter.clear();
        assert_eq!(filter.correction(), 0);
    }
}
