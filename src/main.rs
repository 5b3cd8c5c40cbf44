use anyhow::{Context, Result};
use clap::Parser;
use grocery_classifier::audit::{AuditDetail, AuditLog};
use grocery_classifier::{cli, config, corrections, near_misses, oracle, pipeline, reports};
use grocery_classifier_common::{DualCategoryMap, Product, Taxonomy, Triple};
use cli::{Cli, Commands};
use config::Config;
use corrections::{CorrectionStore, JsonCorrectionStore};
use indicatif::{ProgressBar, ProgressStyle};
use pipeline::{Pipeline, ResultCache};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load().context("設定の読み込みに失敗しました")?;
    if let Some(provider) = cli.ai_provider {
        config.provider = provider;
    }
    if let Some(path) = cli.taxonomy {
        config.taxonomy_path = path;
    }
    if let Some(path) = cli.dual_map {
        config.dual_map_path = path;
    }
    if let Some(path) = cli.corrections {
        config.correction_map_path = path;
    }
    if let Some(dir) = cli.audit_dir {
        config.audit_dir = dir;
    }

    match cli.command {
        Commands::Classify { input, output, cache_token, batch_size, no_fuzzy } => {
            println!("🛒 grocery-classifier - 商品分類\n");

            if let Some(size) = batch_size {
                config.max_batch = size.clamp(1, config::MAX_BATCH);
            }
            if no_fuzzy {
                config.fuzzy_match = false;
            }

            // 1. 入力読み込み
            println!("[1/3] 商品リストを読み込み中...");
            let content = std::fs::read_to_string(&input)
                .with_context(|| format!("入力ファイルを読めません: {}", input.display()))?;
            let mut request = pipeline::parse_request(&content)?;
            if cache_token.is_some() {
                request.existing_cache_token = cache_token;
            }
            println!("✔ {}件の商品\n", request.products.len());

            // 2. 分類
            println!("[2/3] 分類中... (プロバイダ: {})", config.provider);
            let transport = oracle::transport::from_config(&config)?;
            let pipeline = Pipeline::from_config(&config, transport)?;

            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::with_template("  {bar:40.cyan/blue} {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            let report = pipeline
                .run_with_progress(request, |done, total| {
                    bar.set_length(total as u64);
                    bar.set_position(done as u64);
                })
                .await?;
            bar.finish_and_clear();

            let stats = report.stats;
            if stats.from_cache {
                println!("✔ キャッシュから取得（再分類なし）\n");
            } else {
                println!(
                    "✔ 分類完了: 修正マップ {}件 / オラクル {}件 / 失敗 {}件（{}バッチ中{}バッチ失敗）\n",
                    stats.pre_classified, stats.classified, stats.failed, stats.batches, stats.failed_batches
                );
            }

            // 3. 結果保存
            println!("[3/3] 結果を保存中...");
            let output = output.unwrap_or_else(|| input.with_file_name("categorized.json"));
            let json = serde_json::to_string_pretty(&report.response)?;
            std::fs::write(&output, json)
                .with_context(|| format!("出力ファイルに書き込めません: {}", output.display()))?;
            println!("✔ 結果を保存: {}", output.display());
            println!("  キャッシュトークン: {}", report.response.cache_token);

            let audit = pipeline.audit().summary();
            if audit.failures + audit.corrections + audit.ambiguous > 0 {
                println!(
                    "  監査ログ: 失敗 {} / 補正 {} / 要確認 {}（{}）",
                    audit.failures,
                    audit.corrections,
                    audit.ambiguous,
                    config.audit_dir.display()
                );
            }

            println!("\n✅ 分類完了");
        }

        Commands::Approve { product_id, name, brand, category, subcategory, product_type } => {
            if product_id.is_none() && name.is_none() {
                anyhow::bail!("--product-id または --name を指定してください");
            }
            let taxonomy = Taxonomy::from_file(&config.taxonomy_path)
                .with_context(|| format!("タクソノミーを読めません: {}", config.taxonomy_path.display()))?;
            let store = JsonCorrectionStore::new(&config.correction_map_path);
            let triple = Triple::new(&category, &subcategory, &product_type);

            let keys = corrections::approve_correction(
                &store,
                &taxonomy,
                &triple,
                product_id.as_deref(),
                name.as_deref(),
                brand.as_deref(),
            )?;
            println!("✔ 修正を登録しました: {}", triple);
            for key in keys {
                println!("  - {}", key);
            }
        }

        Commands::Check => {
            let taxonomy = Taxonomy::from_file(&config.taxonomy_path)
                .with_context(|| format!("タクソノミーを読めません: {}", config.taxonomy_path.display()))?;
            let dual_map = DualCategoryMap::from_file(&config.dual_map_path)
                .with_context(|| format!("二重カテゴリマップを読めません: {}", config.dual_map_path.display()))?;

            println!("タクソノミー: {}カテゴリ", taxonomy.categories().len());
            println!("二重カテゴリ規則: {}件", dual_map.len());

            let problems = dual_map.check_against(&taxonomy);
            if problems.is_empty() {
                println!("✔ 不整合はありません");
            } else {
                println!("⚠ {}件の不整合:", problems.len());
                for problem in &problems {
                    println!("  - {}", problem);
                }
                anyhow::bail!("二重カテゴリマップに不整合があります");
            }
        }

        Commands::Reports => {
            let converted = reports::convert_failures_to_reports(&config.audit_dir)?;
            println!(
                "✔ {}件の失敗をレポートに変換しました（{}）",
                converted,
                config.audit_dir.join(reports::REPORT_LOG).display()
            );
        }

        Commands::Corrections { lookup, product_id } => {
            let store = JsonCorrectionStore::new(&config.correction_map_path);
            let map = store.load()?;

            println!("修正マップ:");
            println!("  パス: {}", store.path().display());
            println!("  件数: {}（商品IDキー {}件）", map.len(), map.id_key_count());

            if lookup.is_some() || product_id.is_some() {
                let product = Product::new(product_id.as_deref(), lookup.as_deref().unwrap_or(""));
                let audit = AuditLog::in_memory();
                match map.resolve(&product, config.fuzzy_match, &audit) {
                    Some(triple) => println!("  一致: {}", triple),
                    None => println!("  一致なし"),
                }
                if let Some(AuditDetail::NearMiss { best_match, score }) =
                    audit.records().first().map(|r| r.detail.clone())
                {
                    println!("  近い候補: {}（類似度 {:.1}）", best_match, score);
                }
            }
        }

        Commands::NearMisses { min_occurrences, days, json } => {
            let map = JsonCorrectionStore::new(&config.correction_map_path).load()?;
            let options = near_misses::AnalysisOptions {
                min_occurrences,
                days,
                ..Default::default()
            };
            let suggestions = near_misses::analyze_near_misses(&config.audit_dir, &map, options)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&suggestions)?);
                return Ok(());
            }
            if suggestions.is_empty() {
                println!("目立った惜しい候補はありません");
                return Ok(());
            }

            println!("🔍 惜しい候補: {}件\n", suggestions.len());
            for (i, s) in suggestions.iter().enumerate() {
                println!("[{}] {}", i + 1, s.correction_key);
                println!("  出現回数: {}（平均類似度 {:.1}）", s.count, s.average_score);
                println!("  登録済み分類: {}", s.category_info);
                for variant in s.variants.iter().take(5) {
                    println!("    - {}", variant);
                }
                if s.variants.len() > 5 {
                    println!("    - ...ほか{}件", s.variants.len() - 5);
                }
                if !s.suggested_keys.is_empty() {
                    println!("  追加キー候補: {}", s.suggested_keys.join(", "));
                }
                println!();
            }
        }

        Commands::Cache { clear, info } => {
            let target = config.cache_dir.clone();
            let cache_path = ResultCache::cache_path(&target);

            if info || !clear {
                if cache_path.exists() {
                    let cache = ResultCache::load(&target);
                    println!("キャッシュ情報:");
                    println!("  パス: {}", cache_path.display());
                    println!("  件数: {}", cache.len());
                    if let Ok(meta) = std::fs::metadata(&cache_path) {
                        println!("  サイズ: {} bytes", meta.len());
                    }
                } else {
                    println!("キャッシュファイルが存在しません: {}", cache_path.display());
                }
            }

            if clear {
                match ResultCache::clear(&target) {
                    Ok(true) => println!("✔ キャッシュを削除しました: {}", cache_path.display()),
                    Ok(false) => println!("キャッシュファイルが存在しません"),
                    Err(e) => println!("キャッシュ削除エラー: {}", e),
                }
            }
        }

        Commands::Config { set_api_key, show } => {
            if let Some(key) = set_api_key {
                // CLIでの上書きは保存しない
                let mut stored = Config::load()?;
                stored.set_api_key(key)?;
                config.api_key = stored.api_key;
                println!("✔ APIキーを設定しました");
            }

            if show {
                println!("設定:");
                println!("  プロバイダ: {}", config.provider);
                println!("  モデル: {}", config.model);
                println!("  タクソノミー: {}", config.taxonomy_path.display());
                println!("  二重カテゴリマップ: {}", config.dual_map_path.display());
                println!("  修正マップ: {}", config.correction_map_path.display());
                println!("  監査ログ: {}", config.audit_dir.display());
                println!("  バッチサイズ: {}", config.max_batch);
                println!("  リトライ: {}回（基本待ち {}ms）", config.max_retries, config.base_delay_ms);
                println!("  APIキー: {}", if config.get_api_key().is_ok() { "設定済み" } else { "未設定" });
            }
        }
    }

    Ok(())
}
