use std::fmt;

/// エージェント単位のエラー
///
/// エージェント境界で捕捉され、診断として報告されます。記録全体の処理は継続します。
#[derive(Debug, Clone, PartialEq)]
pub enum AgentError {
    /// サンプルを持たない
    Empty(String),
    /// マーカーを1つも持たない（メタデータにのみ宣言されたボディ）
    NoMarkers(String),
    /// 時刻が逆行している
    UnsortedTime(String, f64),
    /// 同一時刻のサンプルが重複している
    DuplicateTime(String, f64),
    /// 同じIDのエージェントが複数存在する
    DuplicateAgent(String),
    /// 時刻が有限値でない
    NonFiniteTime(String, f64),
    /// リサンプリング格子の点数が上限を超える
    GridTooLarge(String, f64),
}

impl AgentError {
    /// 対象エージェントのID
    pub fn agent_id(&self) -> &str {
        match self {
            AgentError::Empty(id)
            | AgentError::NoMarkers(id)
            | AgentError::UnsortedTime(id, _)
            | AgentError::DuplicateTime(id, _)
            | AgentError::DuplicateAgent(id)
            | AgentError::NonFiniteTime(id, _)
            | AgentError::GridTooLarge(id, _) => id,
        }
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Empty(id) => write!(f, "エージェント {} にサンプルがありません", id),
            AgentError::NoMarkers(id) => write!(f, "ボディ {} にマーカーがありません", id),
            AgentError::UnsortedTime(id, t) => {
                write!(f, "エージェント {} の時刻が逆行しています (t={:.3})", id, t)
            }
            AgentError::DuplicateTime(id, t) => {
                write!(f, "エージェント {} の時刻が重複しています (t={:.3})", id, t)
            }
            AgentError::DuplicateAgent(id) => write!(f, "エージェントIDが重複しています: {}", id),
            AgentError::NonFiniteTime(id, t) => write!(f, "エージェント {} の時刻が不正です (t={})", id, t),
            AgentError::GridTooLarge(id, n) => {
                write!(f, "エージェント {} のリサンプリング格子が大きすぎます ({:.0}点)", id, n)
            }
        }
    }
}

impl std::error::Error for AgentError {}

/// 記録単位のエラー
///
/// バッチ境界で捕捉され、他の記録の処理には影響しません。
#[derive(Debug)]
pub enum PipelineError {
    /// 有効なエージェントが1つも残らなかった
    NoValidAgents,
    /// 表の組み立てに失敗
    Table(AgentError),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::NoValidAgents => write!(f, "有効なエージェントがありません"),
            PipelineError::Table(err) => write!(f, "軌跡表の構築エラー: {}", err),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Table(err) => Some(err),
            PipelineError::NoValidAgents => None,
        }
    }
}

impl From<AgentError> for PipelineError {
    fn from(err: AgentError) -> Self {
        PipelineError::Table(err)
    }
}
