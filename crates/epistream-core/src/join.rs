//! Merge-join cursor over two keyed streams.
//!
//! Both streams are keyed by numeric timestep and emitted in non-decreasing
//! key order. The cursor holds one pending member per side and advances the
//! side with the smaller key until both agree, so only timesteps present in
//! both streams are produced. Timesteps seen on one side only are counted in
//! [`JoinStats`] and otherwise dropped: a frame needs both the population and
//! the infection context.

use std::cmp::Ordering;

use crate::cancel::CancelToken;
use crate::error::{PipelineError, PipelineResult};
use crate::model::Timestep;

/// One timestep present in both streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aligned<I, M> {
    pub timestep: Timestep,
    pub infection: I,
    pub movement: M,
}

/// Counters for members that had no partner on the other side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinStats {
    pub aligned: u64,
    pub skipped_infection: u64,
    pub skipped_movement: u64,
}

/// Parse a stream key as a timestep.
pub fn parse_timestep(key: &str) -> PipelineResult<Timestep> {
    key.trim().parse::<Timestep>().map_err(|_| PipelineError::Join {
        message: format!("key {:?} is not a non-negative integer timestep", key),
    })
}

struct Side<S, T> {
    name: &'static str,
    stream: S,
    pending: Option<(Timestep, T)>,
    last: Option<Timestep>,
    /// Repeated keys dropped in favour of the first member.
    duplicates: u64,
}

impl<S, T> Side<S, T>
where
    S: Iterator<Item = PipelineResult<(String, T)>>,
{
    fn new(name: &'static str, stream: S) -> Self {
        Self {
            name,
            stream,
            pending: None,
            last: None,
            duplicates: 0,
        }
    }

    /// Ensure a pending member. `Ok(false)` when the side is exhausted.
    fn fill(&mut self) -> PipelineResult<bool> {
        if self.pending.is_some() {
            return Ok(true);
        }
        loop {
            let Some(item) = self.stream.next() else {
                return Ok(false);
            };
            let (key, value) = item?;
            let ts = parse_timestep(&key)?;
            match self.last {
                Some(last) if ts < last => {
                    return Err(PipelineError::Join {
                        message: format!(
                            "{} stream went backwards: timestep {} after {}",
                            self.name, ts, last
                        ),
                    });
                }
                Some(last) if ts == last => {
                    self.duplicates += 1;
                    continue;
                }
                _ => {}
            }
            self.last = Some(ts);
            self.pending = Some((ts, value));
            return Ok(true);
        }
    }

    fn key(&self) -> Timestep {
        self.pending.as_ref().map(|(ts, _)| *ts).unwrap_or_default()
    }
}

/// Lockstep inner join of an infection stream and a movement stream.
pub struct MergeJoin<IS, MS, I, M> {
    infection: Side<IS, I>,
    movement: Side<MS, M>,
    cancel: CancelToken,
    stats: JoinStats,
    done: bool,
}

impl<IS, MS, I, M> MergeJoin<IS, MS, I, M>
where
    IS: Iterator<Item = PipelineResult<(String, I)>>,
    MS: Iterator<Item = PipelineResult<(String, M)>>,
{
    pub fn new(infection: IS, movement: MS, cancel: CancelToken) -> Self {
        Self {
            infection: Side::new("infection", infection),
            movement: Side::new("movement", movement),
            cancel,
            stats: JoinStats::default(),
            done: false,
        }
    }

    /// Counters so far. Repeated keys count as skipped on their side.
    pub fn stats(&self) -> JoinStats {
        JoinStats {
            skipped_infection: self.stats.skipped_infection + self.infection.duplicates,
            skipped_movement: self.stats.skipped_movement + self.movement.duplicates,
            ..self.stats
        }
    }

    fn advance(&mut self) -> PipelineResult<Option<Aligned<I, M>>> {
        loop {
            self.cancel.check()?;

            if !self.infection.fill()? || !self.movement.fill()? {
                return Ok(None);
            }

            match self.infection.key().cmp(&self.movement.key()) {
                Ordering::Equal => {
                    if let (Some((timestep, infection)), Some((_, movement))) =
                        (self.infection.pending.take(), self.movement.pending.take())
                    {
                        self.stats.aligned += 1;
                        return Ok(Some(Aligned {
                            timestep,
                            infection,
                            movement,
                        }));
                    }
                }
                Ordering::Less => {
                    self.infection.pending = None;
                    self.stats.skipped_infection += 1;
                }
                Ordering::Greater => {
                    self.movement.pending = None;
                    self.stats.skipped_movement += 1;
                }
            }
        }
    }
}

impl<IS, MS, I, M> Iterator for MergeJoin<IS, MS, I, M>
where
    IS: Iterator<Item = PipelineResult<(String, I)>>,
    MS: Iterator<Item = PipelineResult<(String, M)>>,
{
    type Item = PipelineResult<Aligned<I, M>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(aligned)) => Some(Ok(aligned)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn side(keys: &[u64]) -> impl Iterator<Item = PipelineResult<(String, u64)>> {
        keys.iter()
            .map(|k| Ok((k.to_string(), *k)))
            .collect::<Vec<_>>()
            .into_iter()
    }

    fn joined(left: &[u64], right: &[u64]) -> Vec<Timestep> {
        MergeJoin::new(side(left), side(right), CancelToken::new())
            .map(|r| r.unwrap().timestep)
            .collect()
    }

    #[test]
    fn test_skew_is_resolved_by_advancing_smaller_side() {
        assert_eq!(joined(&[0, 60, 120, 180], &[60, 180, 240]), vec![60, 180]);
    }

    #[test]
    fn test_stats_count_unmatched_members() {
        let mut join = MergeJoin::new(side(&[0, 60, 90, 120]), side(&[60, 120]), CancelToken::new());
        let out: Vec<_> = join.by_ref().collect();
        assert_eq!(out.len(), 2);
        assert_eq!(
            join.stats(),
            JoinStats {
                aligned: 2,
                skipped_infection: 2,
                skipped_movement: 0
            }
        );
    }

    #[test]
    fn test_stops_when_either_side_exhausted() {
        assert!(joined(&[], &[60, 120]).is_empty());
        assert_eq!(joined(&[60], &[60, 120]), vec![60]);
    }

    #[test]
    fn test_values_travel_with_their_keys() {
        let infection: Vec<PipelineResult<(String, &str)>> =
            vec![Ok(("60".to_string(), "i60")), Ok(("120".to_string(), "i120"))];
        let movement: Vec<PipelineResult<(String, char)>> = vec![Ok(("120".to_string(), 'm'))];
        let out: Vec<_> = MergeJoin::new(infection.into_iter(), movement.into_iter(), CancelToken::new())
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(
            out,
            vec![Aligned {
                timestep: 120,
                infection: "i120",
                movement: 'm'
            }]
        );
    }

    #[test]
    fn test_non_numeric_key_is_join_error() {
        let infection: Vec<PipelineResult<(String, u64)>> = vec![Ok(("t0".to_string(), 0))];
        let mut join = MergeJoin::new(infection.into_iter(), side(&[0]), CancelToken::new());
        assert!(matches!(join.next(), Some(Err(PipelineError::Join { .. }))));
        assert!(join.next().is_none());
    }

    #[test]
    fn test_regressing_key_is_join_error() {
        let mut join = MergeJoin::new(side(&[120, 60]), side(&[0, 200]), CancelToken::new());
        assert!(matches!(join.next(), Some(Err(PipelineError::Join { .. }))));
    }

    #[test]
    fn test_repeated_key_keeps_first_member() {
        let infection: Vec<PipelineResult<(String, &str)>> = vec![
            Ok(("60".to_string(), "first")),
            Ok(("60".to_string(), "second")),
            Ok(("120".to_string(), "i120")),
        ];
        let mut join = MergeJoin::new(infection.into_iter(), side(&[60, 60, 120]), CancelToken::new());
        let out: Vec<_> = join.by_ref().map(|r| r.unwrap()).collect();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].timestep, 60);
        assert_eq!(out[0].infection, "first");
        assert_eq!(out[1].timestep, 120);
        assert_eq!(join.stats().skipped_infection, 1);
        assert_eq!(join.stats().skipped_movement, 1);
    }

    #[test]
    fn test_side_error_propagates() {
        let movement: Vec<PipelineResult<(String, u64)>> = vec![
            Ok(("60".to_string(), 60)),
            Err(PipelineError::decode("patterns", 42, "truncated")),
        ];
        let mut join = MergeJoin::new(side(&[60, 120]), movement.into_iter(), CancelToken::new());
        assert!(join.next().unwrap().is_ok());
        assert!(matches!(join.next(), Some(Err(PipelineError::Decode { .. }))));
        assert!(join.next().is_none());
    }

    #[test]
    fn test_cancel_stops_before_next_pull() {
        let cancel = CancelToken::new();
        let mut join = MergeJoin::new(side(&[60, 120]), side(&[60, 120]), cancel.clone());
        assert!(join.next().unwrap().is_ok());
        cancel.cancel();
        assert!(matches!(join.next(), Some(Err(PipelineError::Cancelled))));
        assert!(join.next().is_none());
    }

    proptest! {
        #[test]
        fn prop_output_is_intersection_of_key_sets(
            left in prop::collection::btree_set(0u64..500, 0..60),
            right in prop::collection::btree_set(0u64..500, 0..60),
        ) {
            let l: Vec<_> = left.iter().copied().collect();
            let r: Vec<_> = right.iter().copied().collect();
            let expected: Vec<_> = left.intersection(&right).copied().collect();
            let out = joined(&l, &r);
            prop_assert_eq!(&out, &expected);
            let unique: BTreeSet<_> = out.iter().copied().collect();
            prop_assert_eq!(unique.len(), out.len());
        }
    }
}
