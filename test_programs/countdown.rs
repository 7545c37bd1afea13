fn accumulate(limit: u64) -> u64 {
    let mut total = 0;
    for value in 1..=limit {
        total += value;
    }
    total
}

fn main() {
    let total = accumulate(10);
    println!("total = {total}");
}
