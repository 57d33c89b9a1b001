use thermia::spot_price::cheapest_hours;

fn ascending() -> Vec<f64> {
    (1..=24).map(f64::from).collect()
}

#[test]
fn single_cheapest_hour() {
    assert_eq!(cheapest_hours(&ascending(), 1), vec![0]);
}

#[test]
fn all_hours_in_price_order() {
    assert_eq!(cheapest_hours(&ascending(), 24), (0..24).collect::<Vec<_>>());

    let descending: Vec<f64> = ascending().into_iter().rev().collect();
    assert_eq!(
        cheapest_hours(&descending, 24),
        (0..24).rev().collect::<Vec<_>>()
    );
}

#[test]
fn ties_prefer_lower_hour() {
    assert_eq!(cheapest_hours(&[3.0, 3.0, 1.0], 2), vec![2, 0]);

    let mut prices = vec![5.0, 5.0, 5.0, 1.0, 9.0];
    prices.resize(24, 9.0);
    assert_eq!(cheapest_hours(&prices, 2), vec![3, 0]);
}

#[test]
fn selection_is_distinct_sorted_and_stable() {
    let prices: Vec<f64> = (0..24).map(|h| f64::from((h * 7) % 5)).collect();
    for n in 1..=24 {
        let picked = cheapest_hours(&prices, n);
        assert_eq!(picked.len(), n);

        let mut unique = picked.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), n);

        for pair in picked.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            assert!(prices[a] < prices[b] || (prices[a] == prices[b] && a < b));
        }
        assert_eq!(picked, cheapest_hours(&prices, n));
    }
}
