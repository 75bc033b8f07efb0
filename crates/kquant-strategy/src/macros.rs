//! 전략 등록 매크로.

/// 전략을 레지스트리에 등록합니다.
///
/// # 예시
/// ```ignore
/// register_strategy! {
///     id: "ma_1m5m",
///     aliases: ["1m5m"],
///     name: "1분봉-5분평균 교차",
///     description: "1분봉 종가와 5분 이동평균 교차 매매",
///     timeframe: "1m",
///     type: Ma1m5mStrategy
/// }
/// ```
#[macro_export]
macro_rules! register_strategy {
    (
        id: $id:expr,
        aliases: [$($alias:expr),* $(,)?],
        name: $name:expr,
        description: $desc:expr,
        timeframe: $tf:expr,
        type: $ty:ty
    ) => {
        inventory::submit! {
            $crate::registry::StrategyMeta {
                id: $id,
                aliases: &[$($alias),*],
                name: $name,
                description: $desc,
                default_timeframe: $tf,
                factory: || Box::new(<$ty>::default()),
            }
        }
    };
}
