//! Bounded backtracking subset-sum over a deterministic candidate order.

use rust_decimal::Decimal;

/// A deposit offered to the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub line_no: u32,
    pub amount: Decimal,
}

/// Target sum and the slack allowed around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bound {
    pub target: Decimal,
    pub tolerance: Decimal,
}

impl Bound {
    fn admits(&self, sum: Decimal) -> bool {
        (sum - self.target).abs() <= self.tolerance
    }

    fn ceiling(&self) -> Decimal {
        self.target + self.tolerance
    }

    fn floor(&self) -> Decimal {
        self.target - self.tolerance
    }
}

/// The node budget ran out before the search space was covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exhausted;

/// Caps the number of search nodes visited in one pass.
#[derive(Debug)]
pub struct SearchBudget {
    remaining: usize,
}

impl SearchBudget {
    pub fn new(nodes: usize) -> Self {
        Self { remaining: nodes }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    fn spend(&mut self) -> Result<(), Exhausted> {
        if self.remaining == 0 {
            return Err(Exhausted);
        }
        self.remaining -= 1;
        Ok(())
    }
}

/// Candidates sorted by descending amount, ties by line number.
#[derive(Debug, Clone)]
pub struct CandidatePool {
    items: Vec<Candidate>,
}

impl CandidatePool {
    pub fn new(mut items: Vec<Candidate>) -> Self {
        items.sort_by(|a, b| b.amount.cmp(&a.amount).then(a.line_no.cmp(&b.line_no)));
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Candidate> {
        self.items.get(index)
    }

    pub fn total(&self) -> Decimal {
        self.items.iter().map(|c| c.amount).sum()
    }

    /// Pick one disjoint subset per bound, in bound order.
    ///
    /// Each bound tries smaller subsets first and, within a size, subsets in
    /// enumeration order. When a later bound cannot be met the search
    /// backtracks into the previous bound's next candidate. Returns indices
    /// into the pool, or `None` when no complete assignment exists.
    pub fn assign(
        &self,
        bounds: &[Bound],
        budget: &mut SearchBudget,
    ) -> Result<Option<Vec<Vec<usize>>>, Exhausted> {
        let mut available = vec![true; self.items.len()];
        let mut picked = Vec::with_capacity(bounds.len());
        if self.assign_from(bounds, &mut available, &mut picked, budget)? {
            Ok(Some(picked))
        } else {
            Ok(None)
        }
    }

    fn assign_from(
        &self,
        bounds: &[Bound],
        available: &mut [bool],
        picked: &mut Vec<Vec<usize>>,
        budget: &mut SearchBudget,
    ) -> Result<bool, Exhausted> {
        let Some((bound, rest)) = bounds.split_first() else {
            return Ok(true);
        };

        let open: Vec<usize> = (0..self.items.len()).filter(|&i| available[i]).collect();
        for size in 1..=open.len() {
            for subset in self.subsets_of_size(&open, size, bound, budget)? {
                for &i in &subset {
                    available[i] = false;
                }
                picked.push(subset);

                if self.assign_from(rest, available, picked, budget)? {
                    return Ok(true);
                }

                if let Some(subset) = picked.pop() {
                    for i in subset {
                        available[i] = true;
                    }
                }
            }
        }
        Ok(false)
    }

    /// Every `size`-element subset of `open` within the bound, in
    /// enumeration order.
    pub fn subsets_of_size(
        &self,
        open: &[usize],
        size: usize,
        bound: &Bound,
        budget: &mut SearchBudget,
    ) -> Result<Vec<Vec<usize>>, Exhausted> {
        let mut found = Vec::new();
        let mut chosen = Vec::with_capacity(size);
        self.descend(open, 0, size, Decimal::ZERO, bound, &mut chosen, &mut found, budget)?;
        Ok(found)
    }

    #[allow(clippy::too_many_arguments)]
    fn descend(
        &self,
        open: &[usize],
        start: usize,
        size: usize,
        sum: Decimal,
        bound: &Bound,
        chosen: &mut Vec<usize>,
        found: &mut Vec<Vec<usize>>,
        budget: &mut SearchBudget,
    ) -> Result<(), Exhausted> {
        budget.spend()?;

        if chosen.len() == size {
            if bound.admits(sum) {
                found.push(chosen.clone());
            }
            return Ok(());
        }

        let needed = size - chosen.len();
        for pos in start..open.len() {
            if open.len() - pos < needed {
                break;
            }
            // Amounts only shrink from here on, so if the largest possible
            // completion falls short, every later one does too.
            let best: Decimal = open[pos..pos + needed]
                .iter()
                .map(|&i| self.items[i].amount)
                .sum();
            if sum + best < bound.floor() {
                break;
            }

            let amount = self.items[open[pos]].amount;
            if sum + amount > bound.ceiling() {
                continue;
            }

            chosen.push(open[pos]);
            self.descend(open, pos + 1, size, sum + amount, bound, chosen, found, budget)?;
            chosen.pop();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn pool(amounts: &[&str]) -> CandidatePool {
        CandidatePool::new(
            amounts
                .iter()
                .enumerate()
                .map(|(i, a)| Candidate {
                    line_no: i as u32 + 1,
                    amount: Decimal::from_str(a).unwrap(),
                })
                .collect(),
        )
    }

    fn bound(target: &str, tolerance: &str) -> Bound {
        Bound {
            target: Decimal::from_str(target).unwrap(),
            tolerance: Decimal::from_str(tolerance).unwrap(),
        }
    }

    fn line_nos(pool: &CandidatePool, subset: &[usize]) -> Vec<u32> {
        let mut out: Vec<u32> = subset.iter().map(|&i| pool.get(i).unwrap().line_no).collect();
        out.sort();
        out
    }

    #[test]
    fn test_pool_is_sorted_descending_with_stable_ties() {
        let p = pool(&["10.00", "30.00", "10.00", "20.00"]);
        let order: Vec<u32> = (0..p.len()).map(|i| p.get(i).unwrap().line_no).collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
    }

    #[test]
    fn test_fewer_lines_are_preferred() {
        // 50 alone and 30 + 20 both hit the target.
        let p = pool(&["30.00", "20.00", "50.00"]);
        let mut budget = SearchBudget::new(1_000);
        let picked = p.assign(&[bound("50.00", "0")], &mut budget).unwrap().unwrap();
        assert_eq!(line_nos(&p, &picked[0]), vec![3]);
    }

    #[test]
    fn test_backtracks_into_earlier_target() {
        // The first subset found for 55 (50 + 5) leaves nothing that sums to
        // 50, so the search has to come back and take 40 + 15 instead.
        let p = pool(&["50.00", "40.00", "15.00", "5.00"]);
        let mut budget = SearchBudget::new(1_000);
        let picked = p
            .assign(&[bound("55.00", "0"), bound("50.00", "0")], &mut budget)
            .unwrap()
            .unwrap();
        assert_eq!(line_nos(&p, &picked[0]), vec![2, 3]);
        assert_eq!(line_nos(&p, &picked[1]), vec![1]);
    }

    #[test]
    fn test_unreachable_target_returns_none() {
        let p = pool(&["10.00", "20.00"]);
        let mut budget = SearchBudget::new(1_000);
        assert_eq!(p.assign(&[bound("100.00", "1")], &mut budget).unwrap(), None);
    }

    #[test]
    fn test_budget_exhaustion_is_reported() {
        let p = pool(&["1", "2", "3", "4", "5", "6", "7", "8", "9", "10"]);
        let mut budget = SearchBudget::new(5);
        assert_eq!(p.assign(&[bound("1000", "0")], &mut budget), Err(Exhausted));
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn test_subsets_never_reuse_lines() {
        let p = pool(&["25.00", "25.00", "50.00"]);
        let mut budget = SearchBudget::new(1_000);
        let picked = p
            .assign(&[bound("50.00", "0"), bound("50.00", "0")], &mut budget)
            .unwrap()
            .unwrap();
        assert_eq!(line_nos(&p, &picked[0]), vec![3]);
        assert_eq!(line_nos(&p, &picked[1]), vec![1, 2]);
    }
}
