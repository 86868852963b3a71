//! First-fit pin negotiation with exhaustive retry.
//!
//! Stages expose a handful of pins, so trying every free output against every free
//! input is cheap. A refused attempt never aborts the search; only running out of
//! candidates does.

use super::{PinDirection, PinInfo};
use crate::error::Result;

/// Find and connect the first compatible (output, input) pair.
///
/// Candidates are visited in enumeration order: each free output of `upstream`
/// against each free input of `downstream`. `try_connect` performs the attempt.
/// Returns the indices of the connected pair, or `None` if every attempt failed.
pub fn negotiate<F>(
    upstream: &[PinInfo],
    downstream: &[PinInfo],
    mut try_connect: F,
) -> Option<(usize, usize)>
where
    F: FnMut(&PinInfo, &PinInfo) -> Result<()>,
{
    let outputs = upstream
        .iter()
        .filter(|pin| pin.matches(PinDirection::Output));

    for output in outputs {
        let inputs = downstream
            .iter()
            .filter(|pin| pin.matches(PinDirection::Input));
        for input in inputs {
            match try_connect(output, input) {
                Ok(()) => return Some((output.index, input.index)),
                Err(err) => {
                    log::debug!(
                        "negotiate: output pin {} -> input pin {} refused: {}",
                        output.index,
                        input.index,
                        err
                    );
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureError;

    fn connected(mut pin: PinInfo) -> PinInfo {
        pin.connected = true;
        pin
    }

    #[test]
    fn first_free_pair_wins() {
        let up = [PinInfo::output(0), PinInfo::output(1)];
        let down = [PinInfo::input(0)];
        let mut attempts = Vec::new();
        let result = negotiate(&up, &down, |o, i| {
            attempts.push((o.index, i.index));
            Ok(())
        });
        assert_eq!(result, Some((0, 0)));
        assert_eq!(attempts, vec![(0, 0)]);
    }

    #[test]
    fn skips_bound_and_wrong_direction_pins() {
        let up = [PinInfo::input(0), connected(PinInfo::output(1)), PinInfo::output(2)];
        let down = [PinInfo::output(0), connected(PinInfo::input(1)), PinInfo::input(2)];
        let mut attempts = Vec::new();
        let result = negotiate(&up, &down, |o, i| {
            attempts.push((o.index, i.index));
            Ok(())
        });
        assert_eq!(result, Some((2, 2)));
        assert_eq!(attempts, vec![(2, 2)]);
    }

    #[test]
    fn backtracks_past_refused_inputs() {
        let up = [PinInfo::output(0)];
        let down = [PinInfo::input(0), PinInfo::input(1), PinInfo::input(2)];
        let mut attempts = 0;
        let result = negotiate(&up, &down, |_, i| {
            attempts += 1;
            if i.index < 2 {
                Err(CaptureError::rejected("format mismatch"))
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Some((0, 2)));
        assert_eq!(attempts, 3);
    }

    #[test]
    fn backtracks_across_outputs() {
        let up = [PinInfo::output(0), PinInfo::output(1)];
        let down = [PinInfo::input(0)];
        let result = negotiate(&up, &down, |o, _| {
            if o.index == 0 {
                Err(CaptureError::rejected("preview pin"))
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Some((1, 0)));
    }

    #[test]
    fn exhausted_candidates_yield_none() {
        let up = [PinInfo::output(0), PinInfo::output(1)];
        let down = [PinInfo::input(0), PinInfo::input(1)];
        let mut attempts = 0;
        let result = negotiate(&up, &down, |_, _| {
            attempts += 1;
            Err(CaptureError::rejected("no"))
        });
        assert_eq!(result, None);
        assert_eq!(attempts, 4);
    }

    #[test]
    fn no_free_pins_means_no_attempts() {
        let up = [connected(PinInfo::output(0))];
        let down = [PinInfo::input(0)];
        let result = negotiate(&up, &down, |_, _| panic!("must not be called"));
        assert_eq!(result, None);
    }
}
