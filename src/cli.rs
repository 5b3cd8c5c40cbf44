use clap::{Parser, Subcommand};
use crate::ai_provider::AiProvider;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "grocery-classifier")]
#[command(about = "食料品の商品分類・補正パイプライン", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 詳細ログを出力
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// AIプロバイダ (gemini/claude/codex)。省略時は設定ファイルの値
    #[arg(long, global = true)]
    pub ai_provider: Option<AiProvider>,

    /// タクソノミーJSON
    #[arg(long, global = true)]
    pub taxonomy: Option<PathBuf>,

    /// 二重カテゴリマップJSON
    #[arg(long, global = true)]
    pub dual_map: Option<PathBuf>,

    /// 修正マップJSON
    #[arg(long, global = true)]
    pub corrections: Option<PathBuf>,

    /// 監査ログの出力先
    #[arg(long, global = true)]
    pub audit_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 商品リストを分類してJSONを出力
    Classify {
        /// 入力JSON（{products, existing_cache_token?} または商品の配列）
        #[arg(required = true)]
        input: PathBuf,

        /// 出力JSONファイル（デフォルト: 入力と同じ場所の categorized.json）
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 前回のキャッシュトークン（一致すれば再分類しない）
        #[arg(long)]
        cache_token: Option<String>,

        /// バッチサイズ（最大20）
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// 修正マップのあいまい一致を使わない
        #[arg(long)]
        no_fuzzy: bool,
    },

    /// 確認済みの分類を修正マップに登録
    Approve {
        /// 商品ID
        #[arg(long)]
        product_id: Option<String>,

        /// 商品名
        #[arg(long)]
        name: Option<String>,

        /// ブランド名（ブランドなしのキーも登録）
        #[arg(long)]
        brand: Option<String>,

        #[arg(long, required = true)]
        category: String,

        #[arg(long, required = true)]
        subcategory: String,

        #[arg(long, required = true)]
        product_type: String,
    },

    /// タクソノミーと二重カテゴリマップの整合性チェック
    Check,

    /// 失敗ログをレビュー用レポートに変換
    Reports,

    /// 修正マップの情報表示・検索
    Corrections {
        /// 商品名で検索
        #[arg(long)]
        lookup: Option<String>,

        /// 商品IDで検索
        #[arg(long)]
        product_id: Option<String>,
    },

    /// あいまい一致の惜しい候補を集計し、修正マップへの追加候補を表示
    NearMisses {
        /// 候補にする最小出現回数
        #[arg(long, default_value_t = 3)]
        min_occurrences: usize,

        /// 直近何日分を対象にするか（0で全期間）
        #[arg(long, default_value_t = 30)]
        days: i64,

        /// JSONで出力
        #[arg(long)]
        json: bool,
    },

    /// 分類結果キャッシュの管理
    Cache {
        /// キャッシュを削除
        #[arg(long)]
        clear: bool,

        /// キャッシュ情報を表示
        #[arg(long)]
        info: bool,
    },

    /// 設定を管理
    Config {
        /// APIキーを設定
        #[arg(long)]
        set_api_key: Option<String>,

        /// 設定を表示
        #[arg(long)]
        show: bool,
    },
}
