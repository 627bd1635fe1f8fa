//! Set up a tiny tournament and keep standings current as results come in.

use tarragon::{MapInput, QueryHandle, QueryResult, Runtime, ScalarInput};

// We will use constants for simplicity.
const MAD_BANANAS: &str = "Mad Bananas";
const SHY_STOMPERS: &str = "Shy Stompers";
const SMUG_CATS: &str = "Smug Cats";

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
enum MatchResult {
    Win,
    Tie,
    Loss,
}

impl MatchResult {
    fn into_score(self) -> u32 {
        match self {
            MatchResult::Win => 2,
            MatchResult::Tie => 1,
            MatchResult::Loss => 0,
        }
    }

    fn flip_side(self) -> MatchResult {
        match self {
            MatchResult::Win => MatchResult::Loss,
            MatchResult::Tie => MatchResult::Tie,
            MatchResult::Loss => MatchResult::Win,
        }
    }
}

fn main() -> QueryResult<()> {
    let rt = Runtime::new();

    // Roster is a scalar; match results are keyed by the playing pair,
    // recorded from the side of the first team.
    let roster: ScalarInput<Vec<&'static str>> = rt.register_scalar_with(
        "roster",
        vec![MAD_BANANAS, SHY_STOMPERS, SMUG_CATS],
    );
    let matches: MapInput<(&'static str, &'static str), MatchResult> =
        rt.register_map("matches");

    let score: QueryHandle<&'static str, u32> =
        rt.register_query("score", move |cx, team: &&'static str| {
            let mut score = 0;

            for other in roster.get(cx)? {
                if other == *team {
                    continue;
                }

                if let Ok(outcome) = matches.get(&(*team, other), cx) {
                    score += outcome.into_score();
                }

                if let Ok(outcome) = matches.get(&(other, *team), cx) {
                    score += outcome.flip_side().into_score();
                }
            }

            Ok(score)
        });

    let leader = rt.register_query("leader", move |cx, _: &()| {
        let mut best: Option<(&'static str, u32)> = None;

        for team in roster.get(cx)? {
            let points = score.call(team, cx)?;

            best = match best {
                Some((_, top)) if top >= points => best,
                _ => Some((team, points)),
            };
        }

        Ok(best.map(|(team, _)| team))
    });

    rt.set_map(&matches, (MAD_BANANAS, SHY_STOMPERS), MatchResult::Win);
    rt.set_map(&matches, (SMUG_CATS, MAD_BANANAS), MatchResult::Tie);

    println!("leader after two matches: {:?}", rt.call(&leader, ())?);

    rt.set_map(&matches, (SMUG_CATS, SHY_STOMPERS), MatchResult::Win);
    rt.set_map(&matches, (SHY_STOMPERS, MAD_BANANAS), MatchResult::Loss);

    println!("final leader: {:?}", rt.call(&leader, ())?);
    println!(
        "final scores: {} {}, {} {}, {} {}",
        MAD_BANANAS,
        rt.call(&score, MAD_BANANAS)?,
        SHY_STOMPERS,
        rt.call(&score, SHY_STOMPERS)?,
        SMUG_CATS,
        rt.call(&score, SMUG_CATS)?,
    );

    Ok(())
}
