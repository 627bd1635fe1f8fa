//! Letter grades over a mutable grade book, recalculated only on real change.

use tarragon::{QueryResult, Runtime};

fn main() -> QueryResult<()> {
    let rt = Runtime::new();

    // Grade points, in hundredths to keep values exactly comparable.
    let grades = rt.register_map::<String, u32>("grades");

    let letter = rt.register_query("letter", move |cx, name: &String| {
        let points = grades.get(name, cx)?;

        Ok(match points {
            p if p >= 350 => "A",
            p if p >= 250 => "B",
            p if p >= 150 => "C",
            _ => "D",
        })
    });

    rt.set_map(&grades, "John".to_string(), 325);
    println!("rev {:?}: John gets {}", rt.current_revision(), rt.call(&letter, "John".to_string())?);

    // Second call is served straight from cache.
    println!("rev {:?}: John gets {}", rt.current_revision(), rt.call(&letter, "John".to_string())?);

    rt.set_map(&grades, "John".to_string(), 380);
    println!("rev {:?}: John gets {}", rt.current_revision(), rt.call(&letter, "John".to_string())?);

    assert_eq!(rt.call(&letter, "John".to_string())?, "A");

    Ok(())
}
