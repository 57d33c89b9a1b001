/// Indices of the `n` cheapest hours, cheapest first.
///
/// Ties are broken by the lower hour index. `n` larger than the number of
/// prices returns every index; `n == 0` returns nothing.
pub fn cheapest_hours(prices: &[f64], n: usize) -> Vec<usize> {
    let mut ranked: Vec<(usize, f64)> = prices.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    ranked.into_iter().take(n).map(|(hour, _)| hour).collect()
}
