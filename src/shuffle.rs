use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rand_xoshiro::rand_core::SeedableRng;

pub fn seeded(seed: u64) -> Xoshiro256PlusPlus {
    Xoshiro256PlusPlus::seed_from_u64(seed)
}

/// Seed of one job of a randomized computation.
pub fn job_seed(seed: u64, job: u64) -> u64 {
    seed.wrapping_mul(0x9e37_79b9_7f4a_7c15).wrapping_add(job)
}

/// Runs `trials` coin-flip trials over `n` positions; `calc_one` sees which
/// positions were flipped.
pub fn flip_job<TPartial, TCalcOne>(
    mut calc_one: TCalcOne,
    n: usize,
    seed: u64,
    job: u64,
    trials: u64,
    result: &mut TPartial,
) where
    TCalcOne: FnMut(&[bool], &mut TPartial),
{
    let mut flips = vec![false; n];
    let mut rng = seeded(job_seed(seed, job));
    for _ in 0..trials {
        for f in flips.iter_mut() {
            *f = rng.gen_bool(0.5);
        }
        calc_one(&flips, result);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reproducible() {
        let mut a = vec![];
        let mut b = vec![];
        flip_job(|f, r: &mut Vec<Vec<bool>>| r.push(f.to_vec()), 20, 1, 3, 5, &mut a);
        flip_job(|f, r: &mut Vec<Vec<bool>>| r.push(f.to_vec()), 20, 1, 3, 5, &mut b);
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
        assert!(a.iter().flatten().any(|&x| x));
        assert!(a.iter().flatten().any(|&x| !x));
    }

    #[test]
    fn jobs_differ() {
        assert_ne!(job_seed(123456, 0), job_seed(123456, 1));
        assert_ne!(job_seed(1, 0), job_seed(2, 0));
    }
}
