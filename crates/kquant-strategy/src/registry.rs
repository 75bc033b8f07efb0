//! 전략 레지스트리.
//!
//! `inventory` crate로 컴파일 타임에 전략 메타데이터를 수집합니다.
//! 런타임 문자열 기반 클래스 탐색 대신 명시적 팩토리 등록을
//! 사용합니다.

use crate::traits::Strategy;

/// 전략 메타데이터 (컴파일 타임 상수).
///
/// 각 전략은 `register_strategy!` 매크로로 자동 등록됩니다.
pub struct StrategyMeta {
    /// 전략 ID (영문, snake_case)
    pub id: &'static str,
    /// 별칭
    pub aliases: &'static [&'static str],
    /// 전략 이름 (한글)
    pub name: &'static str,
    /// 전략 설명
    pub description: &'static str,
    /// 기본 타임프레임
    pub default_timeframe: &'static str,
    /// 팩토리 함수
    pub factory: fn() -> Box<dyn Strategy>,
}

impl std::fmt::Debug for StrategyMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyMeta")
            .field("id", &self.id)
            .field("aliases", &self.aliases)
            .field("name", &self.name)
            .field("default_timeframe", &self.default_timeframe)
            .field("factory", &"<fn>")
            .finish()
    }
}

impl StrategyMeta {
    /// 전략 ID 또는 별칭으로 매칭.
    pub fn matches(&self, query: &str) -> bool {
        self.id == query || self.aliases.contains(&query)
    }
}

inventory::collect!(StrategyMeta);

/// 전략 레지스트리 조회 API.
pub struct StrategyRegistry;

impl StrategyRegistry {
    /// 모든 등록된 전략 메타데이터.
    pub fn all() -> impl Iterator<Item = &'static StrategyMeta> {
        inventory::iter::<StrategyMeta>.into_iter()
    }

    /// ID/별칭으로 전략 검색.
    pub fn find(query: &str) -> Option<&'static StrategyMeta> {
        Self::all().find(|meta| meta.matches(query))
    }

    /// 전략 인스턴스 생성.
    pub fn create_instance(query: &str) -> Result<Box<dyn Strategy>, String> {
        Self::find(query)
            .map(|meta| (meta.factory)())
            .ok_or_else(|| format!("Unknown strategy: {}", query))
    }

    /// 전략 ID 목록.
    pub fn list_ids() -> Vec<&'static str> {
        Self::all().map(|meta| meta.id).collect()
    }

    /// 등록된 전략 수.
    pub fn count() -> usize {
        Self::all().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registered() {
        // ma_1m5m 내장 전략이 등록되어 있어야 함
        assert!(StrategyRegistry::count() >= 1);
        let meta = StrategyRegistry::find("ma_1m5m").expect("ma_1m5m not registered");
        assert_eq!(meta.default_timeframe, "1m");

        let instance = StrategyRegistry::create_instance("ma_1m5m").unwrap();
        assert_eq!(instance.name(), "ma_1m5m");
    }

    #[test]
    fn test_alias_lookup() {
        assert!(StrategyRegistry::find("1m5m").is_some());
        assert!(StrategyRegistry::find("no_such_strategy").is_none());
    }
}
